use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use serde_json::json;

use super::{reply, reply_flat, AppState, AuthUser, JsonBody, QueryParams};
use crate::models::chats::{
    CreateChatRequest, PageParams, SearchParams, SendMessageRequest, UpdateMessageRequest,
};
use crate::services::{chats::ChatRequest, dispatch, ServiceError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(conversations).post(create_chat))
        .route("/search", get(search_messages))
        .route("/sendmessages", post(send_message))
        .route("/updatemessage", put(update_message))
        .route("/messages/{message_id}", delete(delete_message))
        .route("/read/{chat_id}", get(mark_read))
        .route("/{chat_id}", get(get_chat))
}

async fn conversations(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(params): QueryParams<PageParams>,
) -> Result<Response, ServiceError> {
    let page = dispatch(&state.channels.chats, |response| ChatRequest::Conversations {
        user_id: user.user_id,
        params,
        response,
    })
    .await?;

    Ok(reply_flat(StatusCode::OK, "Conversations retrieved", page))
}

async fn get_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
    QueryParams(params): QueryParams<PageParams>,
) -> Result<Response, ServiceError> {
    let view = dispatch(&state.channels.chats, |response| ChatRequest::GetChat {
        user_id: user.user_id,
        chat_id,
        params,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Chat retrieved", view))
}

/// 201 for a new chat, 200 when the participant set already had one.
async fn create_chat(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<CreateChatRequest>,
) -> Result<Response, ServiceError> {
    let (chat, created) = dispatch(&state.channels.chats, |response| ChatRequest::CreateChat {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    Ok(if created {
        reply(StatusCode::CREATED, "Chat created", chat)
    } else {
        reply(StatusCode::OK, "Chat already exists", chat)
    })
}

async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<SendMessageRequest>,
) -> Result<Response, ServiceError> {
    let message = dispatch(&state.channels.chats, |response| ChatRequest::SendMessage {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    Ok(reply(StatusCode::CREATED, "Message sent", message))
}

async fn update_message(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<UpdateMessageRequest>,
) -> Result<Response, ServiceError> {
    let message = dispatch(&state.channels.chats, |response| ChatRequest::UpdateMessage {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Message updated", message))
}

async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Response, ServiceError> {
    dispatch(&state.channels.chats, |response| ChatRequest::DeleteMessage {
        user_id: user.user_id,
        message_id,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Message deleted", json!(null)))
}

async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
) -> Result<Response, ServiceError> {
    let updated = dispatch(&state.channels.chats, |response| ChatRequest::MarkRead {
        user_id: user.user_id,
        chat_id,
        response,
    })
    .await?;

    Ok(reply(
        StatusCode::OK,
        "Messages marked as read",
        json!({ "updated": updated }),
    ))
}

async fn search_messages(
    State(state): State<AppState>,
    user: AuthUser,
    QueryParams(params): QueryParams<SearchParams>,
) -> Result<Response, ServiceError> {
    let page = dispatch(&state.channels.chats, |response| ChatRequest::Search {
        user_id: user.user_id,
        params,
        response,
    })
    .await?;

    Ok(reply_flat(StatusCode::OK, "Search results", page))
}
