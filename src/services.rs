use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::{mpsc, oneshot};

use crate::repositories::{payments::razorpay::RazorpayApi, storage::FileStore};
use crate::settings::Settings;

pub mod auth;
pub mod bookings;
pub mod chats;
pub mod files;
pub mod http;
pub mod item_types;
pub mod payments;
pub mod posts;
pub mod realtime;
pub mod settlement;
pub mod teams;
pub mod users;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Upstream error: {0} => {1}")]
    Upstream(String, String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn database(e: anyhow::Error) -> Self {
        log::error!("Database failure: {:#}", e);
        ServiceError::Database(e.to_string())
    }

    pub fn upstream(service: &str, e: anyhow::Error) -> Self {
        log::error!("{} failure: {:#}", service, e);
        ServiceError::Upstream(service.to_string(), e.to_string())
    }
}

pub type Responder<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Sends a request to a service actor and waits for its reply.
pub async fn dispatch<R, T, F>(channel: &mpsc::Sender<R>, build: F) -> Result<T, ServiceError>
where
    F: FnOnce(Responder<T>) -> R,
{
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(build(response_tx))
        .await
        .map_err(|e| ServiceError::Communication("send".to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication("receive".to_string(), e.to_string()))?
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Channels into every service actor. Cloned into the HTTP state and into
/// handlers that call other services.
#[derive(Clone)]
pub struct Channels {
    pub users: mpsc::Sender<users::UserRequest>,
    pub posts: mpsc::Sender<posts::PostRequest>,
    pub bookings: mpsc::Sender<bookings::BookingRequest>,
    pub payments: mpsc::Sender<payments::PaymentRequest>,
    pub chats: mpsc::Sender<chats::ChatRequest>,
    pub teams: mpsc::Sender<teams::TeamRequest>,
    pub files: mpsc::Sender<files::FileRequest>,
    pub item_types: mpsc::Sender<item_types::ItemTypeRequest>,
}

pub async fn start_services(pool: PgPool, settings: Settings) -> Result<(), anyhow::Error> {
    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (post_tx, mut post_rx) = mpsc::channel(512);
    let (booking_tx, mut booking_rx) = mpsc::channel(512);
    let (payment_tx, mut payment_rx) = mpsc::channel(512);
    let (chat_tx, mut chat_rx) = mpsc::channel(512);
    let (team_tx, mut team_rx) = mpsc::channel(512);
    let (file_tx, mut file_rx) = mpsc::channel(512);
    let (item_type_tx, mut item_type_rx) = mpsc::channel(512);

    let channels = Channels {
        users: user_tx,
        posts: post_tx,
        bookings: booking_tx,
        payments: payment_tx,
        chats: chat_tx,
        teams: team_tx,
        files: file_tx,
        item_types: item_type_tx,
    };

    let tokens = auth::token::TokenIssuer::new(&settings.auth.jwt_secret, settings.auth.token_ttl_hours);
    let store = FileStore::new(&settings.storage.root, &settings.server.public_base_url).await?;
    let backplane = realtime::backplane::connect(&settings.realtime, &pool).await?;
    let hub = realtime::hub::Hub::new(backplane);
    hub.start();

    log::info!("Starting user service.");
    let user_pool = pool.clone();
    let user_tokens = tokens.clone();
    let otp = auth::otp::OtpProvider::new(
        settings.auth.otp_digits,
        settings.auth.otp_ttl_seconds,
        settings.auth.otp_max_attempts,
    );
    tokio::spawn(async move {
        users::UserService::new()
            .run(
                users::UserRequestHandler::new(
                    user_pool,
                    user_tokens,
                    otp,
                    std::sync::Arc::new(auth::otp::LogDelivery),
                ),
                &mut user_rx,
            )
            .await;
    });

    log::info!("Starting post service.");
    let post_pool = pool.clone();
    let post_store = store.clone();
    let max_file_bytes = settings.storage.max_file_bytes;
    tokio::spawn(async move {
        posts::PostService::new()
            .run(
                posts::PostRequestHandler::new(post_pool, post_store, max_file_bytes),
                &mut post_rx,
            )
            .await;
    });

    log::info!("Starting booking service.");
    let booking_pool = pool.clone();
    let fee_policy = settlement::FeePolicy::new(settings.settlement.platform_fee_bps);
    let overlap_policy = settings.settlement.overlap_policy;
    let signature_verifier = settings
        .razorpay
        .verify_signatures
        .then(|| payments::SignatureVerifier::new(&settings.razorpay.key_secret));
    tokio::spawn(async move {
        bookings::BookingService::new()
            .run(
                bookings::BookingRequestHandler::new(
                    booking_pool,
                    fee_policy,
                    overlap_policy,
                    signature_verifier,
                ),
                &mut booking_rx,
            )
            .await;
    });

    log::info!("Starting payment service.");
    let payment_pool = pool.clone();
    let razorpay = RazorpayApi::new(
        settings.razorpay.url.clone(),
        settings.razorpay.key_id.clone(),
        settings.razorpay.key_secret.clone(),
    );
    tokio::spawn(async move {
        payments::PaymentService::new()
            .run(
                payments::PaymentRequestHandler::new(payment_pool, razorpay),
                &mut payment_rx,
            )
            .await;
    });

    log::info!("Starting chat service.");
    let chat_pool = pool.clone();
    let chat_hub = hub.clone();
    tokio::spawn(async move {
        chats::ChatService::new()
            .run(chats::ChatRequestHandler::new(chat_pool, chat_hub), &mut chat_rx)
            .await;
    });

    log::info!("Starting team service.");
    let team_pool = pool.clone();
    tokio::spawn(async move {
        teams::TeamService::new()
            .run(teams::TeamRequestHandler::new(team_pool), &mut team_rx)
            .await;
    });

    log::info!("Starting file service.");
    let file_pool = pool.clone();
    let file_store = store.clone();
    tokio::spawn(async move {
        files::FileService::new()
            .run(
                files::FileRequestHandler::new(file_pool, file_store, max_file_bytes),
                &mut file_rx,
            )
            .await;
    });

    log::info!("Starting item type service.");
    let item_type_pool = pool.clone();
    tokio::spawn(async move {
        item_types::ItemTypeService::new()
            .run(item_types::ItemTypeRequestHandler::new(item_type_pool), &mut item_type_rx)
            .await;
    });

    log::info!("Starting HTTP server on {}.", settings.server.listen);
    let state = http::AppState::new(
        channels,
        tokens,
        hub,
        store.root().to_path_buf(),
        max_file_bytes,
    );
    http::start_http_server(state, &settings.server.listen).await?;

    Ok(())
}
