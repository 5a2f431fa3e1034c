use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;

use super::{RequestHandler, Responder, Service, ServiceError};
use crate::{
    models::ledger::{HistoryPage, HistoryQuery},
    repositories::payments::{razorpay::RazorpayApi, PaymentRepository},
};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_CURRENCY: &str = "INR";

/// Checks the checkout signature: hex HMAC-SHA256 of `order_id|payment_id`
/// keyed with the gateway secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, order_id: &str, payment_id: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(order_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        mac
    }

    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        hex::encode(self.mac(order_id, payment_id).finalize().into_bytes())
    }

    pub fn verify(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        let Ok(signature) = hex::decode(signature.trim()) else {
            return false;
        };

        self.mac(order_id, payment_id).verify_slice(&signature).is_ok()
    }
}

pub enum PaymentRequest {
    CreateOrder {
        amount: Option<i64>,
        currency: Option<String>,
        response: Responder<serde_json::Value>,
    },
    History {
        user_id: String,
        query: HistoryQuery,
        response: Responder<HistoryPage>,
    },
}

#[derive(Clone)]
pub struct PaymentRequestHandler {
    repository: PaymentRepository,
}

impl PaymentRequestHandler {
    pub fn new(sql_conn: PgPool, razorpay: RazorpayApi) -> Self {
        let repository = PaymentRepository::new(razorpay, sql_conn);

        PaymentRequestHandler { repository }
    }

    /// `amount` is in whole rupees; the gateway takes paise.
    async fn create_order(
        &self,
        amount: Option<i64>,
        currency: Option<String>,
    ) -> Result<serde_json::Value, ServiceError> {
        let amount = amount
            .ok_or_else(|| ServiceError::Validation("Amount is required".to_string()))?;
        if amount <= 0 {
            return Err(ServiceError::Validation(
                "Amount must be positive".to_string(),
            ));
        }
        let amount_minor = amount
            .checked_mul(100)
            .ok_or_else(|| ServiceError::Validation("Amount is too large".to_string()))?;
        let currency = currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let order = self
            .repository
            .create_order(amount_minor, &currency)
            .await
            .map_err(|e| ServiceError::upstream("Razorpay", e))?;

        log::info!(
            "Created order {} for {} {}.",
            order.get("id").and_then(|id| id.as_str()).unwrap_or("?"),
            amount_minor,
            currency
        );

        Ok(order)
    }

    async fn history(&self, user_id: &str, query: &HistoryQuery) -> Result<HistoryPage, ServiceError> {
        self.repository
            .get_history(user_id, query)
            .await
            .map_err(ServiceError::database)
    }
}

#[async_trait]
impl RequestHandler<PaymentRequest> for PaymentRequestHandler {
    async fn handle_request(&self, request: PaymentRequest) {
        match request {
            PaymentRequest::CreateOrder {
                amount,
                currency,
                response,
            } => {
                let order = self.create_order(amount, currency).await;
                let _ = response.send(order);
            }
            PaymentRequest::History {
                user_id,
                query,
                response,
            } => {
                let page = self.history(&user_id, &query).await;
                let _ = response.send(page);
            }
        }
    }
}

pub struct PaymentService;

impl PaymentService {
    pub fn new() -> Self {
        PaymentService {}
    }
}

#[async_trait]
impl Service<PaymentRequest, PaymentRequestHandler> for PaymentService {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_round_trip() {
        let verifier = SignatureVerifier::new("key-secret");
        let signature = verifier.sign("order_1", "pay_1");

        assert_eq!(signature.len(), 64);
        assert!(verifier.verify("order_1", "pay_1", &signature));
        assert!(!verifier.verify("order_1", "pay_2", &signature));
        assert!(!verifier.verify("order_1", "pay_1", "not-hex"));
    }

    #[test]
    fn signatures_depend_on_the_secret() {
        let signature = SignatureVerifier::new("key-secret").sign("order_1", "pay_1");
        assert!(!SignatureVerifier::new("other").verify("order_1", "pay_1", &signature));
    }

    #[test]
    fn matches_reference_hmac() {
        let mut mac = HmacSha256::new_from_slice(b"key-secret").unwrap();
        mac.update(b"order_1|pay_1");
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(SignatureVerifier::new("key-secret").sign("order_1", "pay_1"), expected);
    }
}
