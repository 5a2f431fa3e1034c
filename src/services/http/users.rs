use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Router,
};

use super::{reply, reply_flat, AppState, AuthUser, JsonBody};
use crate::models::users::{PasswordLoginRequest, RegisterRequest};
use crate::services::{dispatch, users::UserRequest, ServiceError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/userInfo", get(user_info))
}

async fn register(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> Result<Response, ServiceError> {
    let session = dispatch(&state.channels.users, |response| UserRequest::Register {
        request,
        response,
    })
    .await?;

    Ok(reply_flat(StatusCode::CREATED, "Registration successful", session))
}

async fn login(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<PasswordLoginRequest>,
) -> Result<Response, ServiceError> {
    let session = dispatch(&state.channels.users, |response| UserRequest::PasswordLogin {
        request,
        response,
    })
    .await?;

    Ok(reply_flat(StatusCode::OK, "Password login successful", session))
}

async fn user_info(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let profile = dispatch(&state.channels.users, |response| UserRequest::GetUser {
        id: user.user_id,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "User Data Generated", profile))
}
