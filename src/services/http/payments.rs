use axum::{extract::State, http::StatusCode, response::Response, routing::post, Router};

use super::{reply, reply_flat, AppState, AuthUser, JsonBody};
use crate::models::ledger::{CreateOrderRequest, HistoryRequest};
use crate::services::{dispatch, payments::PaymentRequest, ServiceError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payment", post(create_order))
        .route("/payment/transitionHistory", post(transaction_history))
}

async fn create_order(
    State(state): State<AppState>,
    _user: AuthUser,
    JsonBody(request): JsonBody<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = dispatch(&state.channels.payments, |response| PaymentRequest::CreateOrder {
        amount: request.amount,
        currency: request.currency,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Order created", order))
}

async fn transaction_history(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<HistoryRequest>,
) -> Result<Response, ServiceError> {
    let page = dispatch(&state.channels.payments, |response| PaymentRequest::History {
        user_id: user.user_id,
        query: request.filter_data,
        response,
    })
    .await?;

    Ok(reply_flat(StatusCode::OK, "Transaction history retrieved!", page))
}
