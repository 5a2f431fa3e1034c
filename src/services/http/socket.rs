use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use super::extract::bearer_token;
use super::{AppState, AuthUser, QueryParams};
use crate::services::{
    chats::ChatRequest,
    dispatch,
    realtime::events::{ClientEvent, Room, ServerEvent},
    ServiceError,
};

#[derive(Deserialize)]
pub struct SocketQuery {
    token: Option<String>,
}

/// `GET /socket?token=<jwt>`. Browsers cannot set headers on WebSocket
/// requests, so the query token is tried before the bearer header.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    QueryParams(query): QueryParams<SocketQuery>,
    headers: HeaderMap,
) -> Result<Response, ServiceError> {
    let token = query
        .token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(&headers));
    let user = AuthUser::from_token(&state, token)?;

    Ok(ws.on_upgrade(move |socket| serve(socket, state, user)))
}

struct Session {
    state: AppState,
    user: AuthUser,
    socket_id: String,
}

async fn serve(socket: WebSocket, state: AppState, user: AuthUser) {
    let (socket_id, mut outbound) = state.hub.register(&user.user_id);
    log::info!("Socket {} connected for user {}.", socket_id, user.user_id);

    let (mut sink, mut stream) = socket.split();
    let mut forward = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let session = Session {
        state,
        user,
        socket_id,
    };
    session.reply(&ServerEvent::Connected {
        message: "Connected successfully".to_string(),
        socket_id: session.socket_id.clone(),
        worker_id: session.state.hub.worker_id().to_string(),
    });

    loop {
        tokio::select! {
            _ = &mut forward => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => session.handle_frame(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("Socket {} read failed: {}", session.socket_id, e);
                    break;
                }
            },
        }
    }

    forward.abort();
    session.disconnect().await;
}

impl Session {
    fn reply(&self, event: &ServerEvent) {
        self.state.hub.send_to(&self.socket_id, event);
    }

    async fn handle_frame(&self, frame: &str) {
        let event = match ClientEvent::parse(frame) {
            Ok(event) => event,
            Err(e) => {
                log::debug!("Socket {} sent a bad frame: {}", self.socket_id, e);
                self.reply(&ServerEvent::error(&e.to_string()));
                return;
            }
        };

        match event {
            ClientEvent::JoinChat(chat_id) => self.join_chat(chat_id).await,
            ClientEvent::JoinUserRoom(user_id) => {
                if user_id != self.user.user_id {
                    self.reply(&ServerEvent::error("Cannot join another user's room"));
                    return;
                }
                let room = Room::User(user_id);
                self.state.hub.join(&self.socket_id, &room);
                self.reply(&ServerEvent::JoinedRoom(room.key()));
            }
            ClientEvent::LeaveChat(chat_id) => {
                self.state.hub.leave(&self.socket_id, &Room::Chat(chat_id.clone()));
                self.reply(&ServerEvent::LeftChat {
                    chat_id,
                    success: true,
                });
            }
            ClientEvent::Typing { chat_id, is_typing } => {
                let room = Room::Chat(chat_id.clone());
                if !self.state.hub.is_member(&self.socket_id, &room) {
                    return;
                }
                let event = ServerEvent::Typing {
                    chat_id,
                    user_id: self.user.user_id.clone(),
                    is_typing,
                };
                self.state.hub.emit_except(room, &self.socket_id, &event).await;
            }
            ClientEvent::UserConnected => {
                if self.state.hub.mark_online(&self.socket_id).is_some() {
                    self.broadcast_online_users().await;
                }
            }
            ClientEvent::Ping => self.reply(&ServerEvent::Pong {
                message: "Pong from server".to_string(),
                timestamp: Utc::now(),
                worker_id: self.state.hub.worker_id().to_string(),
            }),
        }
    }

    async fn join_chat(&self, chat_id: String) {
        let allowed = dispatch(&self.state.channels.chats, |response| {
            ChatRequest::IsParticipant {
                user_id: self.user.user_id.clone(),
                chat_id: chat_id.clone(),
                response,
            }
        })
        .await;

        match allowed {
            Ok(true) => {
                self.state.hub.join(&self.socket_id, &Room::Chat(chat_id.clone()));
                self.reply(&ServerEvent::JoinedChat {
                    chat_id,
                    success: true,
                });
            }
            Ok(false) => self.reply(&ServerEvent::error("Failed to join chat")),
            Err(e) => {
                log::error!("Could not check chat {} membership: {}", chat_id, e);
                self.reply(&ServerEvent::error("Failed to join chat"));
            }
        }
    }

    async fn broadcast_online_users(&self) {
        let online = ServerEvent::UpdateOnlineUsers(self.state.hub.online_users());
        self.state.hub.emit(Room::Global, &online).await;
    }

    async fn disconnect(self) {
        let went_offline = self.state.hub.unregister(&self.socket_id);
        log::info!(
            "Socket {} disconnected for user {}.",
            self.socket_id,
            self.user.user_id
        );
        if went_offline {
            self.broadcast_online_users().await;
        }
    }
}
