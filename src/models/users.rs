use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing)]
    pub otp_hash: Option<String>,
    #[serde(skip_serializing)]
    pub otp_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub otp_attempts: i32,
    pub wallet_balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public projection used wherever another user is embedded in a response.
#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Login handle. Email wins when a client sends both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identifier {
    Email(String),
    Phone(String),
}

impl Identifier {
    pub fn from_parts(email: Option<&str>, phone: Option<&str>) -> Option<Self> {
        let email = email.map(str::trim).filter(|e| !e.is_empty());
        let phone = phone.map(str::trim).filter(|p| !p.is_empty());

        match (email, phone) {
            (Some(email), _) => Some(Identifier::Email(email.to_lowercase())),
            (None, Some(phone)) => Some(Identifier::Phone(phone.to_lowercase())),
            (None, None) => None,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Identifier::Email(v) | Identifier::Phone(v) => v,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Identifier::Email(_) => "email",
            Identifier::Phone(_) => "phone",
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Identifier::Email(email) => email
                .split_once('@')
                .map(|(local, domain)| {
                    !local.is_empty() && domain.contains('.') && !domain.contains(char::is_whitespace)
                })
                .unwrap_or(false),
            Identifier::Phone(phone) => {
                let digits = phone.chars().filter(char::is_ascii_digit).count();
                digits >= 6
                    && phone
                        .chars()
                        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' '))
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpLoginRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub otp_method: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub otp: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordLoginRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub otp_hash: Option<String>,
    pub otp_expires_at: Option<DateTime<Utc>>,
}

/// Result of an OTP request. The code itself is never part of it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpIssued {
    pub user_id: String,
    pub created: bool,
    pub method: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_takes_precedence_and_is_lowercased() {
        let id = Identifier::from_parts(Some(" Renter@Example.COM "), Some("98765 43210")).unwrap();
        assert_eq!(id, Identifier::Email("renter@example.com".to_string()));
        assert_eq!(id.column(), "email");
    }

    #[test]
    fn blank_values_are_ignored() {
        assert_eq!(Identifier::from_parts(Some("  "), None), None);
        let id = Identifier::from_parts(Some(""), Some("+91 98765 43210")).unwrap();
        assert_eq!(id.column(), "phone");
        assert!(id.is_valid());
    }

    #[test]
    fn rejects_malformed_emails() {
        assert!(!Identifier::Email("no-at-sign".into()).is_valid());
        assert!(!Identifier::Email("@example.com".into()).is_valid());
        assert!(Identifier::Email("a@example.com".into()).is_valid());
    }

    #[test]
    fn user_json_hides_secrets() {
        let now = Utc::now();
        let user = User {
            id: "u1".into(),
            phone: None,
            email: Some("a@example.com".into()),
            name: None,
            avatar: None,
            password_hash: Some("hash".into()),
            otp_hash: Some("otp".into()),
            otp_expires_at: Some(now),
            otp_attempts: 2,
            wallet_balance: 42,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("otpHash").is_none());
        assert!(json.get("otpAttempts").is_none());
        assert_eq!(json["walletBalance"], 42);
    }
}
