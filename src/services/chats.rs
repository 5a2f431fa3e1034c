use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;

use super::realtime::events::{Room, ServerEvent};
use super::realtime::hub::Hub;
use super::{RequestHandler, Responder, Service, ServiceError};
use crate::{
    models::{
        chats::{
            check_message_size, Chat, ChatSummary, ChatView, ConversationPage, CreateChatRequest,
            Message, MessageSearchPage, NewMessage, PageInfo, PageParams, Participants,
            SearchParams, SendMessageRequest, UpdateMessageRequest,
        },
        pagination::Page,
        users::UserSummary,
    },
    repositories::{chats::ChatRepository, users::UserRepository},
};

const CONVERSATION_LIMIT: i64 = 20;
const MESSAGE_LIMIT: i64 = 50;
const SEARCH_LIMIT: i64 = 20;
const MAX_CHAT_NAME: usize = 100;

pub enum ChatRequest {
    Conversations {
        user_id: String,
        params: PageParams,
        response: Responder<ConversationPage>,
    },
    GetChat {
        user_id: String,
        chat_id: String,
        params: PageParams,
        response: Responder<ChatView>,
    },
    CreateChat {
        user_id: String,
        request: CreateChatRequest,
        response: Responder<(ChatSummary, bool)>,
    },
    SendMessage {
        user_id: String,
        request: SendMessageRequest,
        response: Responder<Message>,
    },
    UpdateMessage {
        user_id: String,
        request: UpdateMessageRequest,
        response: Responder<Message>,
    },
    DeleteMessage {
        user_id: String,
        message_id: String,
        response: Responder<()>,
    },
    MarkRead {
        user_id: String,
        chat_id: String,
        response: Responder<u64>,
    },
    Search {
        user_id: String,
        params: SearchParams,
        response: Responder<MessageSearchPage>,
    },
    IsParticipant {
        user_id: String,
        chat_id: String,
        response: Responder<bool>,
    },
}

#[derive(Clone)]
pub struct ChatRequestHandler {
    repository: ChatRepository,
    users: UserRepository,
    hub: Hub,
}

fn required(value: Option<String>, message: &str) -> Result<String, ServiceError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::Validation(message.to_string()))
}

fn chat_not_found() -> ServiceError {
    ServiceError::NotFound("Chat not found".to_string())
}

impl ChatRequestHandler {
    pub fn new(sql_conn: PgPool, hub: Hub) -> Self {
        let repository = ChatRepository::new(sql_conn.clone());
        let users = UserRepository::new(sql_conn);

        ChatRequestHandler {
            repository,
            users,
            hub,
        }
    }

    /// The chat, if `user_id` takes part in it. Outsiders get the same 404
    /// as a missing chat.
    async fn accessible_chat(&self, user_id: &str, chat_id: &str) -> Result<Chat, ServiceError> {
        self.repository
            .get_chat(chat_id)
            .await
            .map_err(ServiceError::database)?
            .filter(|chat| chat.has_participant(user_id))
            .ok_or_else(chat_not_found)
    }

    async fn summaries(&self, chats: &[Chat]) -> Result<HashMap<String, UserSummary>, ServiceError> {
        let mut ids: Vec<String> = chats
            .iter()
            .flat_map(|chat| chat.participants.iter().cloned())
            .collect();
        ids.sort();
        ids.dedup();

        let summaries = self
            .users
            .get_summaries(&ids)
            .await
            .map_err(ServiceError::database)?;

        Ok(summaries
            .into_iter()
            .map(|summary| (summary.id.clone(), summary))
            .collect())
    }

    fn summarize(
        chat: Chat,
        users: &HashMap<String, UserSummary>,
        last_message: Option<Message>,
    ) -> ChatSummary {
        let participant_details = chat
            .participants
            .iter()
            .filter_map(|id| users.get(id).cloned())
            .collect();

        ChatSummary {
            chat,
            participant_details,
            last_message,
        }
    }

    async fn conversations(
        &self,
        user_id: &str,
        params: &PageParams,
    ) -> Result<ConversationPage, ServiceError> {
        let page = Page::new(params.page, params.limit, CONVERSATION_LIMIT);
        let (chats, total) = self
            .repository
            .get_chats_for_user(user_id, params.search.as_deref(), page)
            .await
            .map_err(ServiceError::database)?;

        let chat_ids: Vec<String> = chats.iter().map(|chat| chat.id.clone()).collect();
        let mut last_messages: HashMap<String, Message> = self
            .repository
            .get_last_messages(&chat_ids)
            .await
            .map_err(ServiceError::database)?
            .into_iter()
            .map(|message| (message.chat_id.clone(), message))
            .collect();
        let users = self.summaries(&chats).await?;

        let chats = chats
            .into_iter()
            .map(|chat| {
                let last_message = last_messages.remove(&chat.id);
                Self::summarize(chat, &users, last_message)
            })
            .collect();

        Ok(ConversationPage {
            chats,
            pagination: PageInfo::new(page, total),
        })
    }

    async fn get_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        params: &PageParams,
    ) -> Result<ChatView, ServiceError> {
        let chat = self.accessible_chat(user_id, chat_id).await?;
        let page = Page::new(params.page, params.limit, MESSAGE_LIMIT);

        let (messages, total) = self
            .repository
            .get_messages(chat_id, page)
            .await
            .map_err(ServiceError::database)?;
        let users = self.summaries(std::slice::from_ref(&chat)).await?;
        let last_message = messages.last().cloned();

        Ok(ChatView {
            chat: Self::summarize(chat, &users, last_message),
            messages,
            pagination: PageInfo::new(page, total),
        })
    }

    async fn create_chat(
        &self,
        user_id: &str,
        request: CreateChatRequest,
    ) -> Result<(ChatSummary, bool), ServiceError> {
        let name = request.name.as_deref().map(str::trim).unwrap_or_default();
        if request.name.is_some() && (name.is_empty() || name.chars().count() > MAX_CHAT_NAME) {
            return Err(ServiceError::Validation(format!(
                "Chat name must be 1-{} characters",
                MAX_CHAT_NAME
            )));
        }

        let participants = Participants::new(
            request
                .participants
                .into_iter()
                .chain(std::iter::once(user_id.to_string())),
        );
        if participants.len() < 2 {
            return Err(ServiceError::Validation(
                "A chat needs at least one other participant".to_string(),
            ));
        }

        let (chat, created) = self
            .repository
            .get_or_create_chat(name, request.kind, &participants, user_id)
            .await
            .map_err(ServiceError::database)?;

        if created {
            log::info!("User {} created chat {}.", user_id, chat.id);
        }

        let users = self.summaries(std::slice::from_ref(&chat)).await?;
        Ok((Self::summarize(chat, &users, None), created))
    }

    async fn send_message(
        &self,
        user_id: &str,
        request: SendMessageRequest,
    ) -> Result<Message, ServiceError> {
        let chat_id = required(request.chat_id, "chatId is required")?;
        let content = required(request.content, "Message content is required")?;
        check_message_size(&content, &request.attachments).map_err(ServiceError::Validation)?;
        let chat = self.accessible_chat(user_id, &chat_id).await?;
        let receiver = chat.counterpart(user_id).unwrap_or(user_id).to_string();

        let message = self
            .repository
            .insert_message(NewMessage {
                chat_id: chat_id.clone(),
                sender: user_id.to_string(),
                receiver: receiver.clone(),
                content,
                kind: request.kind,
                attachments: request.attachments,
            })
            .await
            .map_err(ServiceError::database)?;

        // Personal rooms cover clients that have not joined the chat room yet.
        let event = ServerEvent::NewMessage(message.clone());
        self.hub.emit(Room::Chat(chat_id), &event).await;
        self.hub.emit(Room::User(user_id.to_string()), &event).await;
        if receiver != user_id {
            self.hub.emit(Room::User(receiver), &event).await;
        }

        Ok(message)
    }

    async fn update_message(
        &self,
        user_id: &str,
        request: UpdateMessageRequest,
    ) -> Result<Message, ServiceError> {
        let message_id = required(request.message_id, "messageId is required")?;
        let content = required(request.content, "Message content is required")?;
        check_message_size(&content, &[]).map_err(ServiceError::Validation)?;

        let message = self
            .repository
            .update_message(&message_id, user_id, &content)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound("Message not found".to_string()))?;

        self.hub
            .emit(
                Room::Chat(message.chat_id.clone()),
                &ServerEvent::MessageUpdated(message.clone()),
            )
            .await;

        Ok(message)
    }

    async fn delete_message(&self, user_id: &str, message_id: &str) -> Result<(), ServiceError> {
        let message = self
            .repository
            .delete_message(message_id, user_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound("Message not found".to_string()))?;

        self.hub
            .emit(
                Room::Chat(message.chat_id.clone()),
                &ServerEvent::MessageDeleted {
                    message_id: message.id,
                    chat_id: message.chat_id,
                },
            )
            .await;

        Ok(())
    }

    async fn mark_read(&self, user_id: &str, chat_id: &str) -> Result<u64, ServiceError> {
        self.accessible_chat(user_id, chat_id).await?;

        self.repository
            .mark_read(chat_id, user_id)
            .await
            .map_err(ServiceError::database)
    }

    async fn search(
        &self,
        user_id: &str,
        params: SearchParams,
    ) -> Result<MessageSearchPage, ServiceError> {
        let query = required(params.query, "query is required")?;
        let page = Page::new(params.page, params.limit, SEARCH_LIMIT);

        let chat_ids = match params.chat_id.filter(|id| !id.trim().is_empty()) {
            Some(chat_id) => vec![self.accessible_chat(user_id, &chat_id).await?.id],
            None => self
                .repository
                .get_chat_ids_for_user(user_id)
                .await
                .map_err(ServiceError::database)?,
        };

        let (messages, total) = self
            .repository
            .search_messages(&chat_ids, &query, page)
            .await
            .map_err(ServiceError::database)?;

        Ok(MessageSearchPage {
            messages,
            pagination: PageInfo::new(page, total),
        })
    }

    async fn is_participant(&self, user_id: &str, chat_id: &str) -> Result<bool, ServiceError> {
        match self.accessible_chat(user_id, chat_id).await {
            Ok(_) => Ok(true),
            Err(ServiceError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RequestHandler<ChatRequest> for ChatRequestHandler {
    async fn handle_request(&self, request: ChatRequest) {
        match request {
            ChatRequest::Conversations {
                user_id,
                params,
                response,
            } => {
                let page = self.conversations(&user_id, &params).await;
                let _ = response.send(page);
            }
            ChatRequest::GetChat {
                user_id,
                chat_id,
                params,
                response,
            } => {
                let view = self.get_chat(&user_id, &chat_id, &params).await;
                let _ = response.send(view);
            }
            ChatRequest::CreateChat {
                user_id,
                request,
                response,
            } => {
                let chat = self.create_chat(&user_id, request).await;
                let _ = response.send(chat);
            }
            ChatRequest::SendMessage {
                user_id,
                request,
                response,
            } => {
                let message = self.send_message(&user_id, request).await;
                let _ = response.send(message);
            }
            ChatRequest::UpdateMessage {
                user_id,
                request,
                response,
            } => {
                let message = self.update_message(&user_id, request).await;
                let _ = response.send(message);
            }
            ChatRequest::DeleteMessage {
                user_id,
                message_id,
                response,
            } => {
                let result = self.delete_message(&user_id, &message_id).await;
                let _ = response.send(result);
            }
            ChatRequest::MarkRead {
                user_id,
                chat_id,
                response,
            } => {
                let updated = self.mark_read(&user_id, &chat_id).await;
                let _ = response.send(updated);
            }
            ChatRequest::Search {
                user_id,
                params,
                response,
            } => {
                let results = self.search(&user_id, params).await;
                let _ = response.send(results);
            }
            ChatRequest::IsParticipant {
                user_id,
                chat_id,
                response,
            } => {
                let allowed = self.is_participant(&user_id, &chat_id).await;
                let _ = response.send(allowed);
            }
        }
    }
}

pub struct ChatService;

impl ChatService {
    pub fn new() -> Self {
        ChatService {}
    }
}

#[async_trait]
impl Service<ChatRequest, ChatRequestHandler> for ChatService {}
