use std::path::PathBuf;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{services::ServeDir, trace::TraceLayer};

use super::{auth::token::TokenIssuer, realtime::hub::Hub, Channels};

mod auth;
mod bookings;
mod chats;
mod error;
mod extract;
mod files;
mod item_types;
mod payments;
mod posts;
mod socket;
mod teams;
mod users;

pub use extract::{AuthUser, JsonBody, MultipartForm, QueryParams};

/// Files accepted in one multipart request.
pub const MAX_FILES_PER_REQUEST: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub channels: Channels,
    pub tokens: TokenIssuer,
    pub hub: Hub,
    uploads_root: PathBuf,
    body_limit: usize,
}

impl AppState {
    pub fn new(
        channels: Channels,
        tokens: TokenIssuer,
        hub: Hub,
        uploads_root: PathBuf,
        max_file_bytes: usize,
    ) -> Self {
        Self {
            channels,
            tokens,
            hub,
            uploads_root,
            // Multipart framing on top of the largest allowed batch.
            body_limit: max_file_bytes
                .saturating_mul(MAX_FILES_PER_REQUEST)
                .saturating_add(1024 * 1024),
        }
    }
}

/// `{"success": true, "message": ..., "data": ...}`
pub fn reply<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        Json(json!({
            "success": true,
            "message": message,
            "data": data,
        })),
    )
        .into_response()
}

/// Like [`reply`] but with the body's fields at the top level. `message`
/// replaces any field of the same name.
pub fn reply_flat<T: Serialize>(status: StatusCode, message: &str, body: T) -> Response {
    let mut value = match serde_json::to_value(body) {
        Ok(Value::Object(map)) => map,
        Ok(other) => return reply(status, message, other),
        Err(e) => {
            log::error!("Could not encode response body: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    value.insert("success".to_string(), Value::Bool(true));
    value.insert("message".to_string(), Value::String(message.to_string()));

    (status, Json(Value::Object(value))).into_response()
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(auth::routes())
        .merge(users::routes())
        .merge(posts::routes())
        .merge(bookings::routes())
        .merge(payments::routes())
        .merge(item_types::routes())
        .nest("/chats", chats::routes())
        .nest("/teams", teams::routes())
        .nest("/files", files::routes());

    Router::new()
        .nest("/api", api)
        .route("/socket", get(socket::upgrade))
        .route("/health", get(|| async { "OK" }))
        .nest_service("/uploads", ServeDir::new(&state.uploads_root))
        .layer(DefaultBodyLimit::max(state.body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(state: AppState, listen: &str) -> Result<(), anyhow::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn flat_replies_lift_fields() {
        let response = reply_flat(
            StatusCode::OK,
            "Booking summary retrieved!",
            json!({"total": 5, "page": 1}),
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body(response).await,
            json!({"success": true, "message": "Booking summary retrieved!", "total": 5, "page": 1})
        );
    }

    #[tokio::test]
    async fn non_object_bodies_fall_back_to_data() {
        let response = reply_flat(StatusCode::CREATED, "ok", vec![1, 2]);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body(response).await["data"], json!([1, 2]));
    }
}
