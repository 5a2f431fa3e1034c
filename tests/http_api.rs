use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tower::ServiceExt;

use rental_market::models::{
    bookings::{Booking, BookingPage, StatusCounts},
    chats::{Chat, ChatSummary, ChatType},
    users::OtpIssued,
};
use rental_market::services::{
    auth::token::TokenIssuer,
    bookings::BookingRequest,
    chats::ChatRequest,
    http::{router, AppState},
    realtime::{backplane::LocalBackplane, hub::Hub},
    users::UserRequest,
    Channels, ServiceError,
};

const SECRET: &str = "integration-secret";

/// Channels whose receivers are handed back so each test can play the
/// service actors it needs. Unused receivers are simply dropped.
struct Actors {
    users: mpsc::Receiver<UserRequest>,
    bookings: mpsc::Receiver<BookingRequest>,
    chats: mpsc::Receiver<ChatRequest>,
}

fn app() -> (Router, Actors, TokenIssuer, tempfile::TempDir) {
    let (users_tx, users) = mpsc::channel(8);
    let (posts_tx, _) = mpsc::channel(8);
    let (bookings_tx, bookings) = mpsc::channel(8);
    let (payments_tx, _) = mpsc::channel(8);
    let (chats_tx, chats) = mpsc::channel(8);
    let (teams_tx, _) = mpsc::channel(8);
    let (files_tx, _) = mpsc::channel(8);
    let (item_types_tx, _) = mpsc::channel(8);

    let channels = Channels {
        users: users_tx,
        posts: posts_tx,
        bookings: bookings_tx,
        payments: payments_tx,
        chats: chats_tx,
        teams: teams_tx,
        files: files_tx,
        item_types: item_types_tx,
    };

    let tokens = TokenIssuer::new(SECRET, 1);
    let hub = Hub::new(Arc::new(LocalBackplane::new()));
    let uploads = tempfile::tempdir().unwrap();
    let state = AppState::new(
        channels,
        tokens.clone(),
        hub,
        uploads.path().to_path_buf(),
        1024 * 1024,
    );

    (router(state), Actors { users, bookings, chats }, tokens, uploads)
}

fn bearer(tokens: &TokenIssuer, user_id: &str) -> String {
    format!("Bearer {}", tokens.issue(user_id, None).unwrap())
}

fn post_json(uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn chat(id: &str, participants: &[&str]) -> Chat {
    let now = Utc::now();
    Chat {
        id: id.to_string(),
        name: "Direct chat".to_string(),
        kind: ChatType::Direct,
        participants: participants.iter().map(|p| p.to_string()).collect(),
        participant_key: participants.join(","),
        created_by: participants[0].to_string(),
        last_message_id: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn health_check_answers_ok() {
    let (app, _actors, _tokens, _uploads) = app();

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn protected_routes_distinguish_missing_and_bad_tokens() {
    let (app, _actors, _tokens, _uploads) = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/booking", None, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Access denied. No token provided");
    assert_eq!(body["error"], "AuthError");

    let response = app
        .oneshot(post_json("/api/booking", Some("Bearer not-a-jwt"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "AuthError");
}

#[tokio::test]
async fn tokens_from_another_secret_are_rejected() {
    let (app, _actors, _tokens, _uploads) = app();
    let foreign = TokenIssuer::new("some-other-secret", 1);

    let response = app
        .oneshot(post_json(
            "/api/booking",
            Some(&bearer(&foreign, "u1")),
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn booking_validation_errors_render_as_bad_request() {
    let (app, mut actors, tokens, _uploads) = app();

    tokio::spawn(async move {
        while let Some(request) = actors.bookings.recv().await {
            if let BookingRequest::Create { user_id, response, .. } = request {
                assert_eq!(user_id, "renter-1");
                let _ = response.send(Err(ServiceError::Validation(
                    "bookingDetails is required".to_string(),
                )));
            }
        }
    });

    let response = app
        .oneshot(post_json(
            "/api/booking",
            Some(&bearer(&tokens, "renter-1")),
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({
            "success": false,
            "message": "bookingDetails is required",
            "error": "ValidationError",
        })
    );
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let (app, _actors, _tokens, _uploads) = app();

    let request = Request::post("/api/login/otp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "ValidationError");
}

#[tokio::test]
async fn server_failures_hide_details() {
    let (app, mut actors, tokens, _uploads) = app();

    tokio::spawn(async move {
        while let Some(request) = actors.bookings.recv().await {
            if let BookingRequest::Summary { response, .. } = request {
                let _ = response.send(Err(ServiceError::Database(
                    "relation \"bookings\" does not exist".to_string(),
                )));
            }
        }
    });

    let response = app
        .oneshot(post_json(
            "/api/bookings/summary",
            Some(&bearer(&tokens, "owner-1")),
            json!({"filterData": {}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Internal server error");
    assert_eq!(body["error"], "InternalError");
}

#[tokio::test]
async fn booking_summary_is_flat() {
    let (app, mut actors, tokens, _uploads) = app();

    tokio::spawn(async move {
        while let Some(request) = actors.bookings.recv().await {
            if let BookingRequest::Summary {
                user_id,
                query,
                response,
            } = request
            {
                assert_eq!(user_id, "owner-1");
                assert_eq!(query.page, Some(2));
                let page: BookingPage<Booking> = BookingPage {
                    total: 0,
                    page: 2,
                    limit: 10,
                    data: Vec::new(),
                    counts: StatusCounts::default(),
                };
                let _ = response.send(Ok(page));
            }
        }
    });

    let response = app
        .oneshot(post_json(
            "/api/bookings/summary",
            Some(&bearer(&tokens, "owner-1")),
            json!({"filterData": {"page": "2", "limit": 10}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Booking summary retrieved!");
    assert_eq!(body["page"], 2);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["counts"]["pending"], 0);
}

#[tokio::test]
async fn create_chat_reports_whether_it_was_new() {
    let (app, mut actors, tokens, _uploads) = app();

    tokio::spawn(async move {
        let mut seen = false;
        while let Some(request) = actors.chats.recv().await {
            if let ChatRequest::CreateChat { user_id, response, .. } = request {
                let summary = ChatSummary {
                    chat: chat("chat-1", &[&user_id, "u2"]),
                    participant_details: Vec::new(),
                    last_message: None,
                };
                let _ = response.send(Ok((summary, !seen)));
                seen = true;
            }
        }
    });

    let auth = bearer(&tokens, "u1");
    let body = json!({"participants": ["u2"]});

    let first = app
        .clone()
        .oneshot(post_json("/api/chats", Some(&auth), body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first = json_body(first).await;
    assert_eq!(first["message"], "Chat created");
    assert_eq!(first["data"]["id"], "chat-1");
    assert_eq!(first["data"]["type"], "direct");
    assert!(first["data"].get("participantKey").is_none());

    let second = app
        .oneshot(post_json("/api/chats", Some(&auth), body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await["message"], "Chat already exists");
}

#[tokio::test]
async fn otp_request_for_new_user_is_created() {
    let (app, mut actors, _tokens, _uploads) = app();

    tokio::spawn(async move {
        while let Some(request) = actors.users.recv().await {
            if let UserRequest::RequestOtp { request, response } = request {
                assert_eq!(request.phone.as_deref(), Some("+919876543210"));
                let _ = response.send(Ok(OtpIssued {
                    user_id: "u-new".to_string(),
                    created: true,
                    method: "sms".to_string(),
                }));
            }
        }
    });

    let response = app
        .oneshot(post_json(
            "/api/login/otp",
            None,
            json!({"phone": "+919876543210"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "User registered and OTP sent");
    assert_eq!(body["userId"], "u-new");
    assert_eq!(body["method"], "sms");
}

#[tokio::test]
async fn stopped_services_surface_as_server_errors() {
    let (app, _actors, tokens, _uploads) = app();

    // The posts receiver was dropped when the app was built.
    let response = app
        .oneshot(
            Request::get("/api/posts/mine")
                .header(header::AUTHORIZATION, bearer(&tokens, "u1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn socket_greets_and_answers_ping() {
    let (app, _actors, tokens, _uploads) = app();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let token = tokens.issue("u1", None).unwrap();
    let url = format!("ws://{}/socket?token={}", addr, token);
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let frame = socket.next().await.unwrap().unwrap();
    let connected: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(connected["event"], "connected");
    assert_eq!(connected["data"]["message"], "Connected successfully");
    assert!(connected["data"]["socketId"].is_string());

    socket
        .send(tungstenite::Message::Text(r#"{"event":"ping"}"#.into()))
        .await
        .unwrap();
    let frame = socket.next().await.unwrap().unwrap();
    let pong: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(pong["event"], "pong");
    assert_eq!(pong["data"]["message"], "Pong from server");

    socket
        .send(tungstenite::Message::Text(
            r#"{"event":"join-user-room","data":"someone-else"}"#.into(),
        ))
        .await
        .unwrap();
    let frame = socket.next().await.unwrap().unwrap();
    let refused: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(refused["event"], "error");
}

#[tokio::test]
async fn socket_without_token_is_refused() {
    let (app, _actors, _tokens, _uploads) = app();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let result = tokio_tungstenite::connect_async(format!("ws://{}/socket", addr)).await;
    match result {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), StatusCode::UNAUTHORIZED.as_u16())
        }
        other => panic!("expected an HTTP rejection, got {:?}", other.map(|_| ())),
    }
}
