use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Router,
};

use super::{reply, reply_flat, AppState, AuthUser, JsonBody};
use crate::models::bookings::{
    BookingListRequest, BookingQueryRequest, CreateBookingRequest, PaymentUpdateRequest,
    UpdateStatusRequest,
};
use crate::services::{bookings::BookingRequest, dispatch, ServiceError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/booking", post(create_booking))
        .route("/bookinglist", post(booking_list))
        .route("/bookings/summary", post(booking_summary))
        .route("/bookings/myBookings", post(my_bookings))
        .route("/bookings/updateStatus", post(update_status))
        .route("/bookings/payment-update", post(payment_update))
        .route("/bookings/unavailable/{product_id}", get(unavailable_dates))
        .route("/bookings/check/{product_id}", get(check_existing))
}

async fn create_booking(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<CreateBookingRequest>,
) -> Result<Response, ServiceError> {
    let booking = dispatch(&state.channels.bookings, |response| BookingRequest::Create {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    Ok(reply(StatusCode::CREATED, "Booking created successfully", booking))
}

async fn booking_list(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<BookingListRequest>,
) -> Result<Response, ServiceError> {
    let bookings = dispatch(&state.channels.bookings, |response| BookingRequest::List {
        user_id: user.user_id,
        filter: request.filter_data.unwrap_or_default(),
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Bookings retrieved", bookings))
}

async fn booking_summary(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<BookingQueryRequest>,
) -> Result<Response, ServiceError> {
    let page = dispatch(&state.channels.bookings, |response| BookingRequest::Summary {
        user_id: user.user_id,
        query: request.filter_data,
        response,
    })
    .await?;

    Ok(reply_flat(StatusCode::OK, "Booking summary retrieved!", page))
}

async fn my_bookings(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<BookingQueryRequest>,
) -> Result<Response, ServiceError> {
    let page = dispatch(&state.channels.bookings, |response| BookingRequest::MyBookings {
        user_id: user.user_id,
        query: request.filter_data,
        response,
    })
    .await?;

    Ok(reply_flat(StatusCode::OK, "Booking summary retrieved!", page))
}

async fn update_status(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<UpdateStatusRequest>,
) -> Result<Response, ServiceError> {
    let update = dispatch(&state.channels.bookings, |response| BookingRequest::UpdateStatus {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    let message = if update.changed {
        "Booking status updated successfully"
    } else {
        "Booking already has this status"
    };
    Ok(reply(StatusCode::OK, message, update))
}

async fn payment_update(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<PaymentUpdateRequest>,
) -> Result<Response, ServiceError> {
    let result = dispatch(&state.channels.bookings, |response| BookingRequest::PaymentUpdate {
        user_id: user.user_id,
        request,
        response,
    })
    .await?;

    let message = if result.already_settled {
        "Payment was already settled"
    } else {
        "Payment updated successfully"
    };
    Ok(reply(StatusCode::OK, message, result))
}

async fn unavailable_dates(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(product_id): Path<String>,
) -> Result<Response, ServiceError> {
    let ranges = dispatch(&state.channels.bookings, |response| BookingRequest::Unavailable {
        post_id: product_id,
        response,
    })
    .await?;

    Ok(reply(StatusCode::OK, "Unavailable dates retrieved", ranges))
}

async fn check_existing(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
) -> Result<Response, ServiceError> {
    let existing = dispatch(&state.channels.bookings, |response| BookingRequest::CheckExisting {
        user_id: user.user_id,
        post_id: product_id,
        response,
    })
    .await?;

    Ok(reply_flat(StatusCode::OK, "Booking status checked", existing))
}
