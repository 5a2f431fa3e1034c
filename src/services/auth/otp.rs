use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::models::users::Identifier;

/// Issues numeric one-time codes with a fixed lifetime and a cap on wrong
/// guesses per code.
#[derive(Clone, Debug)]
pub struct OtpProvider {
    digits: u32,
    ttl: Duration,
    max_attempts: i32,
}

#[derive(Clone, Debug)]
pub struct OneTimeCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl OtpProvider {
    pub fn new(digits: u32, ttl_seconds: i64, max_attempts: i32) -> Self {
        Self {
            digits: digits.clamp(4, 10),
            ttl: Duration::seconds(ttl_seconds.max(30)),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Failed verifications after which the code is discarded.
    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    pub fn issue(&self) -> OneTimeCode {
        self.issue_at(Utc::now())
    }

    pub fn issue_at(&self, now: DateTime<Utc>) -> OneTimeCode {
        let mut rng = rand::thread_rng();
        let code = (0..self.digits)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();

        OneTimeCode {
            code,
            expires_at: now + self.ttl,
        }
    }

    pub fn is_well_formed(&self, code: &str) -> bool {
        code.len() == self.digits as usize && code.chars().all(|c| c.is_ascii_digit())
    }
}

pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.map(|at| at <= now).unwrap_or(true)
}

/// Hands a freshly issued code to the user.
#[async_trait]
pub trait OtpDelivery: Send + Sync + 'static {
    async fn deliver(&self, to: &Identifier, method: &str, code: &str) -> Result<(), anyhow::Error>;
}

/// Writes codes to the debug log. Stands in for an SMS or mail gateway.
pub struct LogDelivery;

#[async_trait]
impl OtpDelivery for LogDelivery {
    async fn deliver(&self, to: &Identifier, method: &str, code: &str) -> Result<(), anyhow::Error> {
        log::debug!("OTP for {} via {}: {}", to.value(), method, code);
        Ok(())
    }
}
