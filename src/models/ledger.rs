use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pagination::{lenient_i64_opt, Page};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "transaction_type", rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Failed,
    Refunded,
    Held,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "earnings_status", rename_all = "lowercase")]
pub enum EarningsStatus {
    Earned,
    Refunded,
}

/// Immutable ledger row. `user_id` is the account the row belongs to,
/// `source_user_id` the counterparty.
#[derive(Clone, Debug, Serialize, sqlx::FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub source_user_id: String,
    pub booking_id: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: TransactionType,
    pub method: String,
    pub amount: i64,
    pub deposit_amount: i64,
    pub platform_fee: i64,
    pub actual_rental_amount: Option<i64>,
    pub note: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewLedgerEntry {
    pub user_id: String,
    pub source_user_id: String,
    pub booking_id: String,
    pub kind: TransactionType,
    pub method: String,
    pub amount: i64,
    pub deposit_amount: i64,
    pub platform_fee: i64,
    pub actual_rental_amount: Option<i64>,
    pub note: Option<String>,
    pub status: TransactionStatus,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformEarning {
    pub id: String,
    pub booking_id: String,
    pub owner_id: String,
    pub customer_id: String,
    pub rental_amount: i64,
    pub deposit_amount: i64,
    pub platform_fee: i64,
    pub method: String,
    pub status: EarningsStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewPlatformEarning {
    pub booking_id: String,
    pub owner_id: String,
    pub customer_id: String,
    pub rental_amount: i64,
    pub deposit_amount: i64,
    pub platform_fee: i64,
    pub method: String,
    pub status: EarningsStatus,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TypeFilter {
    #[default]
    All,
    Credit,
    Debit,
}

impl TypeFilter {
    pub fn kind(&self) -> Option<TransactionType> {
        match self {
            TypeFilter::All => None,
            TypeFilter::Credit => Some(TransactionType::Credit),
            TypeFilter::Debit => Some(TransactionType::Debit),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default, rename = "type")]
    pub kind: TypeFilter,
    #[serde(default)]
    pub search: String,
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub limit: Option<i64>,
}

impl HistoryQuery {
    pub const DEFAULT_LIMIT: i64 = 10;

    pub fn page(&self) -> Page {
        Page::new(self.page, self.limit, Self::DEFAULT_LIMIT)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    #[serde(default)]
    pub filter_data: HistoryQuery,
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TypeCounts {
    pub all: i64,
    pub credit: i64,
    pub debit: i64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_amount: i64,
    pub data: Vec<LedgerEntry>,
    pub type_counts: TypeCounts,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub amount: Option<i64>,
    pub currency: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn history_filter_reads_type_key() {
        let request: HistoryRequest =
            serde_json::from_value(json!({"filterData": {"type": "debit", "search": "upi"}})).unwrap();
        assert_eq!(request.filter_data.kind.kind(), Some(TransactionType::Debit));
        assert_eq!(request.filter_data.page(), Page { page: 1, limit: 10 });
    }

    #[test]
    fn ledger_entry_serializes_kind_as_type() {
        let entry = LedgerEntry {
            id: "t1".into(),
            user_id: "owner".into(),
            source_user_id: "renter".into(),
            booking_id: "b1".into(),
            kind: TransactionType::Credit,
            method: "upi".into(),
            amount: 988,
            deposit_amount: 200,
            platform_fee: 12,
            actual_rental_amount: None,
            note: None,
            status: TransactionStatus::Success,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "credit");
        assert_eq!(value["status"], "success");
        assert_eq!(value["platformFee"], 12);
    }
}
