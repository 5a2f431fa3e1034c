use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    routing::post,
    Router,
};

use super::{reply_flat, AppState, JsonBody};
use crate::models::users::{OtpLoginRequest, VerifyOtpRequest};
use crate::services::{dispatch, users::UserRequest, ServiceError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login/otp", post(request_otp))
        .route("/verify/otp", post(verify_otp))
}

async fn request_otp(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<OtpLoginRequest>,
) -> Result<Response, ServiceError> {
    let issued = dispatch(&state.channels.users, |response| UserRequest::RequestOtp {
        request,
        response,
    })
    .await?;

    let (status, message) = if issued.created {
        (StatusCode::CREATED, "User registered and OTP sent".to_string())
    } else {
        (StatusCode::OK, format!("OTP sent via {}", issued.method))
    };

    Ok(reply_flat(status, &message, issued))
}

async fn verify_otp(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<VerifyOtpRequest>,
) -> Result<Response, ServiceError> {
    let session = dispatch(&state.channels.users, |response| UserRequest::VerifyOtp {
        request,
        response,
    })
    .await?;

    Ok(reply_flat(StatusCode::OK, "OTP verified successfully", session))
}
