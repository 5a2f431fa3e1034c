use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;

use super::payments::SignatureVerifier;
use super::settlement::{FeePolicy, SettlementEngine, SettlementResult, StatusUpdate};
use super::{RequestHandler, Responder, Service, ServiceError};
use crate::{
    models::bookings::{
        Booking, BookingPage, BookingQuery, BookingScope, BookingWithPost, CreateBookingRequest,
        DateRange, ExistingBooking, OverlapFilter, PaymentUpdateRequest, UpdateStatusRequest,
    },
    models::posts::Post,
    repositories::{
        bookings::{BookingRepository, CreateOutcome},
        posts::PostRepository,
    },
    settings::OverlapPolicy,
};

pub enum BookingRequest {
    Create {
        user_id: String,
        request: CreateBookingRequest,
        response: Responder<Booking>,
    },
    List {
        user_id: String,
        filter: OverlapFilter,
        response: Responder<Vec<Booking>>,
    },
    Summary {
        user_id: String,
        query: BookingQuery,
        response: Responder<BookingPage<Booking>>,
    },
    MyBookings {
        user_id: String,
        query: BookingQuery,
        response: Responder<BookingPage<BookingWithPost>>,
    },
    UpdateStatus {
        user_id: String,
        request: UpdateStatusRequest,
        response: Responder<StatusUpdate>,
    },
    PaymentUpdate {
        user_id: String,
        request: PaymentUpdateRequest,
        response: Responder<SettlementResult>,
    },
    Unavailable {
        post_id: String,
        response: Responder<Vec<DateRange>>,
    },
    CheckExisting {
        user_id: String,
        post_id: String,
        response: Responder<ExistingBooking>,
    },
}

#[derive(Clone)]
pub struct BookingRequestHandler {
    repository: BookingRepository,
    posts: PostRepository,
    engine: SettlementEngine<BookingRepository>,
    overlap: OverlapPolicy,
}

fn booking_id(value: Option<String>) -> Result<String, ServiceError> {
    value
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServiceError::Validation("bookingId is required".to_string()))
}

impl BookingRequestHandler {
    pub fn new(
        sql_conn: PgPool,
        fees: FeePolicy,
        overlap: OverlapPolicy,
        verifier: Option<SignatureVerifier>,
    ) -> Self {
        let repository = BookingRepository::new(sql_conn.clone());
        let posts = PostRepository::new(sql_conn);
        let engine = SettlementEngine::new(repository.clone(), fees, overlap, verifier);

        BookingRequestHandler {
            repository,
            posts,
            engine,
            overlap,
        }
    }

    async fn create(
        &self,
        user_id: &str,
        request: CreateBookingRequest,
    ) -> Result<Booking, ServiceError> {
        let details = request
            .booking_details
            .ok_or_else(|| ServiceError::Validation("bookingDetails is required".to_string()))?;
        details.validate().map_err(ServiceError::Validation)?;

        let post = self
            .posts
            .get_post(&details.post_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound("Post not found".to_string()))?;
        if post.created_by != details.owner_id {
            return Err(ServiceError::Validation(
                "ownerId does not match the post's owner".to_string(),
            ));
        }
        if post.created_by == user_id {
            return Err(ServiceError::Validation(
                "You cannot book your own post".to_string(),
            ));
        }

        let reject_overlap = self.overlap == OverlapPolicy::Reject;
        let outcome = self
            .repository
            .insert_booking(user_id, &details, reject_overlap)
            .await
            .map_err(ServiceError::database)?;

        match outcome {
            CreateOutcome::Created(booking) => {
                log::info!(
                    "User {} booked post {} as {}.",
                    user_id,
                    details.post_id,
                    booking.id
                );
                Ok(booking)
            }
            CreateOutcome::Overlap => Err(ServiceError::Conflict(
                "dates overlap an approved booking for this post".to_string(),
            )),
        }
    }

    /// With a complete filter, every booking of the post touching the range.
    /// Otherwise the caller's own bookings on either side.
    async fn list(&self, user_id: &str, filter: OverlapFilter) -> Result<Vec<Booking>, ServiceError> {
        let post_id = filter.post_id.filter(|id| !id.trim().is_empty());
        match (filter.check_in, filter.check_out, post_id) {
            (Some(check_in), Some(check_out), Some(post_id)) => {
                if check_out < check_in {
                    return Err(ServiceError::Validation(
                        "checkOut must not be before checkIn".to_string(),
                    ));
                }
                self.repository
                    .get_overlapping(&post_id, check_in, check_out)
                    .await
                    .map_err(ServiceError::database)
            }
            _ => self
                .repository
                .get_bookings_for_party(user_id)
                .await
                .map_err(ServiceError::database),
        }
    }

    async fn page(
        &self,
        scope: BookingScope,
        query: &BookingQuery,
    ) -> Result<BookingPage<Booking>, ServiceError> {
        let page = query.page();
        let (data, total, counts) = self
            .repository
            .list_bookings(&scope, query)
            .await
            .map_err(ServiceError::database)?;

        Ok(BookingPage {
            total,
            page: page.page,
            limit: page.limit,
            data,
            counts,
        })
    }

    async fn summary(
        &self,
        user_id: &str,
        query: &BookingQuery,
    ) -> Result<BookingPage<Booking>, ServiceError> {
        self.page(BookingScope::Owner(user_id.to_string()), query)
            .await
    }

    /// Renter view. Post data is joined best-effort: a failed lookup leaves
    /// the bookings bare.
    async fn my_bookings(
        &self,
        user_id: &str,
        query: &BookingQuery,
    ) -> Result<BookingPage<BookingWithPost>, ServiceError> {
        let page = self
            .page(BookingScope::Renter(user_id.to_string()), query)
            .await?;

        let mut post_ids: Vec<String> = page
            .data
            .iter()
            .map(|booking| booking.details().post_id.clone())
            .collect();
        post_ids.sort();
        post_ids.dedup();

        let posts: HashMap<String, Post> = match self.posts.get_posts(&post_ids).await {
            Ok(posts) => posts.into_iter().map(|post| (post.id.clone(), post)).collect(),
            Err(e) => {
                log::warn!("Could not join posts into bookings: {:#}", e);
                HashMap::new()
            }
        };

        let data = page
            .data
            .into_iter()
            .map(|booking| {
                let post = posts.get(&booking.details().post_id).cloned();
                BookingWithPost { booking, post }
            })
            .collect();

        Ok(BookingPage {
            total: page.total,
            page: page.page,
            limit: page.limit,
            data,
            counts: page.counts,
        })
    }

    async fn update_status(
        &self,
        user_id: &str,
        request: UpdateStatusRequest,
    ) -> Result<StatusUpdate, ServiceError> {
        let booking_id = booking_id(request.booking_id)?;
        let next = request
            .new_status
            .ok_or_else(|| ServiceError::Validation("newStatus is required".to_string()))?;

        self.engine
            .update_status(
                user_id,
                &booking_id,
                next,
                request.is_damaged,
                request.damage_amount,
            )
            .await
    }

    async fn payment_update(
        &self,
        user_id: &str,
        request: PaymentUpdateRequest,
    ) -> Result<SettlementResult, ServiceError> {
        let booking_id = booking_id(request.booking_id)?;
        let method = request
            .payment_method
            .ok_or_else(|| ServiceError::Validation("paymentMethod is required".to_string()))?;

        self.engine
            .settle_payment(
                user_id,
                &booking_id,
                method,
                request.amount,
                request.gateway_reference,
            )
            .await
    }

    async fn unavailable(&self, post_id: &str) -> Result<Vec<DateRange>, ServiceError> {
        self.repository
            .get_approved_ranges(post_id)
            .await
            .map_err(ServiceError::database)
    }

    async fn check_existing(
        &self,
        user_id: &str,
        post_id: &str,
    ) -> Result<ExistingBooking, ServiceError> {
        let booking = self
            .repository
            .get_active_booking(user_id, post_id)
            .await
            .map_err(ServiceError::database)?;

        Ok(booking
            .as_ref()
            .map(ExistingBooking::from)
            .unwrap_or_else(ExistingBooking::none))
    }
}

#[async_trait]
impl RequestHandler<BookingRequest> for BookingRequestHandler {
    async fn handle_request(&self, request: BookingRequest) {
        match request {
            BookingRequest::Create {
                user_id,
                request,
                response,
            } => {
                let booking = self.create(&user_id, request).await;
                let _ = response.send(booking);
            }
            BookingRequest::List {
                user_id,
                filter,
                response,
            } => {
                let bookings = self.list(&user_id, filter).await;
                let _ = response.send(bookings);
            }
            BookingRequest::Summary {
                user_id,
                query,
                response,
            } => {
                let page = self.summary(&user_id, &query).await;
                let _ = response.send(page);
            }
            BookingRequest::MyBookings {
                user_id,
                query,
                response,
            } => {
                let page = self.my_bookings(&user_id, &query).await;
                let _ = response.send(page);
            }
            BookingRequest::UpdateStatus {
                user_id,
                request,
                response,
            } => {
                let update = self.update_status(&user_id, request).await;
                let _ = response.send(update);
            }
            BookingRequest::PaymentUpdate {
                user_id,
                request,
                response,
            } => {
                let result = self.payment_update(&user_id, request).await;
                let _ = response.send(result);
            }
            BookingRequest::Unavailable { post_id, response } => {
                let ranges = self.unavailable(&post_id).await;
                let _ = response.send(ranges);
            }
            BookingRequest::CheckExisting {
                user_id,
                post_id,
                response,
            } => {
                let existing = self.check_existing(&user_id, &post_id).await;
                let _ = response.send(existing);
            }
        }
    }
}

pub struct BookingService;

impl BookingService {
    pub fn new() -> Self {
        BookingService {}
    }
}

#[async_trait]
impl Service<BookingRequest, BookingRequestHandler> for BookingService {}
