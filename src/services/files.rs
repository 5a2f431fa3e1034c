use async_trait::async_trait;
use sqlx::PgPool;

use super::{RequestHandler, Responder, Service, ServiceError};
use crate::{
    models::{
        files::{ChatFilesPage, ChatFilesQuery, FileContent, NewStoredFile, StoredFile},
        pagination::Page,
        posts::UploadedFile,
    },
    repositories::{
        chats::ChatRepository,
        files::FileRepository,
        storage::{check_shared_file, FileStore},
    },
};

const FILE_PREFIX: &str = "files";

pub enum FileRequest {
    Upload {
        user_id: String,
        chat_id: Option<String>,
        file: Option<UploadedFile>,
        response: Responder<StoredFile>,
    },
    Get {
        file_id: String,
        response: Responder<FileContent>,
    },
    ChatFiles {
        user_id: String,
        chat_id: String,
        query: ChatFilesQuery,
        response: Responder<ChatFilesPage>,
    },
}

#[derive(Clone)]
pub struct FileRequestHandler {
    repository: FileRepository,
    chats: ChatRepository,
    store: FileStore,
    max_file_bytes: usize,
}

impl FileRequestHandler {
    pub fn new(sql_conn: PgPool, store: FileStore, max_file_bytes: usize) -> Self {
        let repository = FileRepository::new(sql_conn.clone());
        let chats = ChatRepository::new(sql_conn);

        FileRequestHandler {
            repository,
            chats,
            store,
            max_file_bytes,
        }
    }

    async fn ensure_participant(&self, user_id: &str, chat_id: &str) -> Result<(), ServiceError> {
        let chat = self
            .chats
            .get_chat(chat_id)
            .await
            .map_err(ServiceError::database)?;

        match chat {
            Some(chat) if chat.has_participant(user_id) => Ok(()),
            _ => Err(ServiceError::NotFound("Chat not found".to_string())),
        }
    }

    async fn upload(
        &self,
        user_id: &str,
        chat_id: Option<String>,
        file: Option<UploadedFile>,
    ) -> Result<StoredFile, ServiceError> {
        let file = file.ok_or_else(|| ServiceError::Validation("No file uploaded".to_string()))?;
        if file.bytes.len() > self.max_file_bytes {
            return Err(ServiceError::Validation(format!(
                "File exceeds the {} byte limit",
                self.max_file_bytes
            )));
        }
        check_shared_file(&file.original_name, &file.mimetype).map_err(ServiceError::Validation)?;

        let chat_id = chat_id.filter(|id| !id.trim().is_empty());
        if let Some(chat_id) = &chat_id {
            self.ensure_participant(user_id, chat_id).await?;
        }

        let object = self
            .store
            .put(FILE_PREFIX, &file.original_name, &file.bytes)
            .await
            .map_err(|e| ServiceError::upstream("FileStore", e))?;

        let record = NewStoredFile {
            original_name: file.original_name,
            storage_key: object.key.clone(),
            url: object.url,
            mimetype: file.mimetype,
            size: file.bytes.len() as i64,
            uploaded_by: user_id.to_string(),
            chat_id,
        };

        match self.repository.insert_file(record).await {
            Ok(stored) => {
                log::info!("User {} uploaded file {}.", user_id, stored.id);
                Ok(stored)
            }
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&object.key).await {
                    log::warn!("Could not remove orphaned object {}: {:#}", object.key, cleanup);
                }
                Err(ServiceError::database(e))
            }
        }
    }

    async fn get(&self, file_id: &str) -> Result<FileContent, ServiceError> {
        let file = self
            .repository
            .get_file(file_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound("File not found".to_string()))?;

        let bytes = self
            .store
            .get(&file.storage_key)
            .await
            .map_err(|e| ServiceError::upstream("FileStore", e))?;

        Ok(FileContent { file, bytes })
    }

    async fn chat_files(
        &self,
        user_id: &str,
        chat_id: &str,
        query: &ChatFilesQuery,
    ) -> Result<ChatFilesPage, ServiceError> {
        self.ensure_participant(user_id, chat_id).await?;

        let page = Page::new(query.page, query.limit, ChatFilesQuery::DEFAULT_LIMIT);
        let (files, total) = self
            .repository
            .get_chat_files(chat_id, query.mime_filter.as_deref(), page)
            .await
            .map_err(ServiceError::database)?;

        Ok(ChatFilesPage {
            files,
            total,
            page: page.page,
            total_pages: page.total_pages(total),
        })
    }
}

#[async_trait]
impl RequestHandler<FileRequest> for FileRequestHandler {
    async fn handle_request(&self, request: FileRequest) {
        match request {
            FileRequest::Upload {
                user_id,
                chat_id,
                file,
                response,
            } => {
                let stored = self.upload(&user_id, chat_id, file).await;
                let _ = response.send(stored);
            }
            FileRequest::Get { file_id, response } => {
                let content = self.get(&file_id).await;
                let _ = response.send(content);
            }
            FileRequest::ChatFiles {
                user_id,
                chat_id,
                query,
                response,
            } => {
                let page = self.chat_files(&user_id, &chat_id, &query).await;
                let _ = response.send(page);
            }
        }
    }
}

pub struct FileService;

impl FileService {
    pub fn new() -> Self {
        FileService {}
    }
}

#[async_trait]
impl Service<FileRequest, FileRequestHandler> for FileService {}
