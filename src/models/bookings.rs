use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;

use super::pagination::{lenient_i64_opt, Page};
use super::posts::Post;
use super::{flexible_datetime, flexible_datetime_opt};

/// Largest amount, in minor units, a booking or payment may carry. Keeps
/// every sum and fee product the ledger computes well inside `i64`.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "booking_status", rename_all = "lowercase")]
pub enum BookingStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Returned,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Returned => "returned",
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Approved)
                | (BookingStatus::Pending, BookingStatus::Rejected)
                | (BookingStatus::Approved, BookingStatus::Returned)
        )
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
pub enum PaymentMethod {
    Upi,
    Wallet,
    Card,
    Cod,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Upi => "upi",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Card => "card",
            PaymentMethod::Cod => "cod",
        }
    }

    pub fn is_online(&self) -> bool {
        !matches!(self, PaymentMethod::Cod)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
}

/// Gateway reference as sent by the checkout widget.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReference {
    #[serde(alias = "razorpay_order_id")]
    pub order_id: Option<String>,
    #[serde(alias = "razorpay_payment_id")]
    pub payment_id: Option<String>,
    #[serde(alias = "razorpay_signature")]
    pub signature: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDetails {
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub signature: Option<String>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetails {
    pub post_id: String,
    pub owner_id: String,
    pub rented_by: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: BookingStatus,
    pub rental_amount: i64,
    pub deposit_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_code: Option<String>,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    pub payment_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub razorpay_details: Option<GatewayDetails>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub booking_details: BookingDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn details(&self) -> &BookingDetails {
        &self.booking_details
    }

    pub fn status(&self) -> BookingStatus {
        self.booking_details.status
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.booking_details.owner_id == user_id || self.booking_details.rented_by == user_id
    }
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct BookingRow {
    pub id: String,
    pub post_id: String,
    pub owner_id: String,
    pub rented_by: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: BookingStatus,
    pub rental_amount: i64,
    pub deposit_amount: i64,
    pub product_name: Option<String>,
    pub booking_code: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub payment_completed: bool,
    pub razorpay_details: Option<Json<GatewayDetails>>,
    pub extra: Json<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.id,
            booking_details: BookingDetails {
                post_id: row.post_id,
                owner_id: row.owner_id,
                rented_by: row.rented_by,
                start_date: row.start_date,
                end_date: row.end_date,
                status: row.status,
                rental_amount: row.rental_amount,
                deposit_amount: row.deposit_amount,
                product_name: row.product_name,
                booking_code: row.booking_code,
                payment_status: row.payment_status,
                payment_method: row.payment_method,
                payment_completed: row.payment_completed,
                razorpay_details: row.razorpay_details.map(|details| details.0),
                extra: row.extra.0,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Booking bag as submitted by the renter. `rentedBy` is taken from the
/// session; a value in the body is ignored.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBookingDetails {
    pub post_id: String,
    pub owner_id: String,
    #[serde(alias = "checkIn", deserialize_with = "flexible_datetime")]
    pub start_date: DateTime<Utc>,
    #[serde(alias = "checkOut", deserialize_with = "flexible_datetime")]
    pub end_date: DateTime<Utc>,
    pub status: Option<BookingStatus>,
    pub rental_amount: i64,
    #[serde(default)]
    pub deposit_amount: i64,
    pub product_name: Option<String>,
    #[serde(alias = "bookingId")]
    pub booking_code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewBookingDetails {
    /// Keys the server owns. A client copy of them in the extension bag
    /// would shadow the typed fields on the way out.
    const RESERVED_KEYS: [&'static str; 9] = [
        "id",
        "rentedBy",
        "status",
        "paymentStatus",
        "paymentMethod",
        "paymentCompleted",
        "razorpayDetails",
        "checkIn",
        "checkOut",
    ];

    pub fn sanitized_extra(&self) -> Map<String, Value> {
        self.extra
            .iter()
            .filter(|(key, _)| !Self::RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.post_id.trim().is_empty() || self.owner_id.trim().is_empty() {
            return Err("postId and ownerId are required".to_string());
        }
        if self.end_date < self.start_date {
            return Err("endDate must not be before startDate".to_string());
        }
        if self.rental_amount < 0 || self.deposit_amount < 0 {
            return Err("amounts must not be negative".to_string());
        }
        if self.rental_amount > MAX_AMOUNT || self.deposit_amount > MAX_AMOUNT {
            return Err(format!("amounts must not exceed {}", MAX_AMOUNT));
        }
        if matches!(self.status, Some(status) if status != BookingStatus::Pending) {
            return Err("new bookings start as pending".to_string());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub booking_details: Option<NewBookingDetails>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub booking_id: Option<String>,
    pub new_status: Option<BookingStatus>,
    #[serde(default)]
    pub is_damaged: bool,
    pub damage_amount: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentUpdateRequest {
    pub booking_id: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub amount: Option<i64>,
    #[serde(alias = "razorpayDetails")]
    pub gateway_reference: Option<GatewayReference>,
}

/// Availability overlap query used by `bookinglist`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapFilter {
    #[serde(default, deserialize_with = "flexible_datetime_opt")]
    pub check_in: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_datetime_opt")]
    pub check_out: Option<DateTime<Utc>>,
    pub post_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingListRequest {
    #[serde(default)]
    pub filter_data: Option<OverlapFilter>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Pending,
    Approved,
    Rejected,
    Returned,
    /// Anything past pending or approved.
    Completed,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingQuery {
    #[serde(default)]
    pub status: StatusFilter,
    #[serde(default)]
    pub search: String,
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub limit: Option<i64>,
}

impl BookingQuery {
    pub const DEFAULT_LIMIT: i64 = 2;

    pub fn page(&self) -> Page {
        Page::new(self.page, self.limit, Self::DEFAULT_LIMIT)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingQueryRequest {
    #[serde(default)]
    pub filter_data: BookingQuery,
}

/// Which side of the booking a listing is scoped to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingScope {
    Owner(String),
    Renter(String),
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub all: i64,
    pub pending: i64,
    pub approved: i64,
    pub completed: i64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingWithPost {
    #[serde(flatten)]
    pub booking: Booking,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Post>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingPage<T> {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub data: Vec<T>,
    pub counts: StatusCounts,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow, PartialEq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingBooking {
    pub already_booked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BookingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl ExistingBooking {
    pub fn none() -> Self {
        Self {
            already_booked: false,
            status: None,
            start_date: None,
            end_date: None,
        }
    }
}

impl From<&Booking> for ExistingBooking {
    fn from(booking: &Booking) -> Self {
        Self {
            already_booked: true,
            status: Some(booking.booking_details.status),
            start_date: Some(booking.booking_details.start_date),
            end_date: Some(booking.booking_details.end_date),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pagination::MAX_PAGE;
    use serde_json::json;

    #[test]
    fn state_machine_allows_only_forward_edges() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Returned));

        assert!(!Pending.can_transition_to(Returned));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Returned.can_transition_to(Approved));
        assert!(!Returned.can_transition_to(Returned));
    }

    #[test]
    fn new_booking_accepts_check_in_aliases_and_extra_fields() {
        let details: NewBookingDetails = serde_json::from_value(json!({
            "postId": "p1",
            "ownerId": "o1",
            "rentedBy": "spoofed",
            "checkIn": "2025-06-01",
            "checkOut": "2025-06-03T10:00:00Z",
            "rentalAmount": 1000,
            "depositAmount": 200,
            "bookingId": "BK-1001",
            "deliveryNotes": "leave at gate"
        }))
        .unwrap();

        assert!(details.validate().is_ok());
        assert_eq!(details.booking_code.as_deref(), Some("BK-1001"));
        assert_eq!(details.extra["deliveryNotes"], "leave at gate");
        assert_eq!(details.extra["rentedBy"], "spoofed");

        let extra = details.sanitized_extra();
        assert!(extra.get("rentedBy").is_none());
        assert_eq!(extra["deliveryNotes"], "leave at gate");
    }

    #[test]
    fn new_booking_rejects_inverted_ranges() {
        let details: NewBookingDetails = serde_json::from_value(json!({
            "postId": "p1",
            "ownerId": "o1",
            "startDate": "2025-06-05",
            "endDate": "2025-06-03",
            "rentalAmount": 1000
        }))
        .unwrap();
        assert!(details.validate().is_err());
    }

    #[test]
    fn new_booking_rejects_oversized_amounts() {
        let details: NewBookingDetails = serde_json::from_value(json!({
            "postId": "p1",
            "ownerId": "o1",
            "startDate": "2025-06-01",
            "endDate": "2025-06-03",
            "rentalAmount": 100_000_000_000_000_000i64
        }))
        .unwrap();
        assert!(details.validate().is_err());

        let details: NewBookingDetails = serde_json::from_value(json!({
            "postId": "p1",
            "ownerId": "o1",
            "startDate": "2025-06-01",
            "endDate": "2025-06-03",
            "rentalAmount": MAX_AMOUNT,
            "depositAmount": MAX_AMOUNT
        }))
        .unwrap();
        assert!(details.validate().is_ok());
    }

    #[test]
    fn query_defaults_match_listing_defaults() {
        let request: BookingQueryRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request.filter_data.status, StatusFilter::All);
        assert_eq!(request.filter_data.page(), Page { page: 1, limit: 2 });

        let request: BookingQueryRequest =
            serde_json::from_value(json!({"filterData": {"status": "completed", "page": "2", "limit": 5}}))
                .unwrap();
        assert_eq!(request.filter_data.status, StatusFilter::Completed);
        assert_eq!(request.filter_data.page().offset(), 5);
    }

    #[test]
    fn string_page_numbers_at_the_integer_limit_are_clamped() {
        let request: BookingQueryRequest = serde_json::from_value(
            json!({"filterData": {"page": "9223372036854775807", "limit": 2}}),
        )
        .unwrap();
        let page = request.filter_data.page();
        assert_eq!(page.page, MAX_PAGE);
        assert_eq!(page.offset(), (MAX_PAGE - 1) * 2);
    }
}
