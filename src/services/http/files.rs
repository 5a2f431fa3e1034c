use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use super::{reply, AppState, AuthUser, MultipartForm, QueryParams};
use crate::models::files::ChatFilesQuery;
use crate::services::{dispatch, files::FileRequest, ServiceError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_file))
        .route("/chat/{chat_id}", get(chat_files))
        .route("/{file_id}", get(get_file))
}

/// Multipart with a single `file` part and an optional `chatId`.
async fn upload_file(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let mut form = MultipartForm::read(multipart).await?;
    let chat_id = form.field("chatId");
    if form.files.len() > 1 {
        return Err(ServiceError::Validation(
            "Only one file may be uploaded at a time".to_string(),
        ));
    }
    let file = form.files.pop();

    let stored = dispatch(&state.channels.files, |response| FileRequest::Upload {
        user_id: user.user_id,
        chat_id,
        file,
        response,
    })
    .await?;

    Ok(reply(StatusCode::CREATED, "File uploaded", stored))
}

async fn get_file(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(file_id): Path<String>,
) -> Result<Response, ServiceError> {
    let content = dispatch(&state.channels.files, |response| FileRequest::Get {
        file_id,
        response,
    })
    .await?;

    let disposition = format!(
        "inline; filename=\"{}\"",
        content.file.original_name.replace('"', "")
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content.file.mimetype),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content.bytes,
    )
        .into_response())
}

async fn chat_files(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
    QueryParams(query): QueryParams<ChatFilesQuery>,
) -> Result<Response, ServiceError> {
    let page = dispatch(&state.channels.files, |response| FileRequest::ChatFiles {
        user_id: user.user_id,
        chat_id,
        query,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Files retrieved", page))
}
