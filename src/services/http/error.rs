use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::services::ServiceError;

const GENERIC_FAILURE: &str = "Internal server error";

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Upstream(..)
            | ServiceError::Database(_)
            | ServiceError::Communication(..)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "ValidationError",
            ServiceError::NotFound(_) => "NotFoundError",
            ServiceError::Unauthorized(_) | ServiceError::Forbidden(_) => "AuthError",
            ServiceError::Conflict(_) => "ConflictError",
            ServiceError::Upstream(..) => "UpstreamError",
            ServiceError::Database(_)
            | ServiceError::Communication(..)
            | ServiceError::Internal(_) => "InternalError",
        }
    }
}

/// `{"success": false, "message": ..., "error": ...}`. Server-side failures
/// are logged and reported without detail.
impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            log::error!("Request failed with {}: {}", status, self);
            GENERIC_FAILURE.to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(json!({
                "success": false,
                "message": message,
                "error": self.kind(),
            })),
        )
            .into_response()
    }
}
