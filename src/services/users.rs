use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use super::auth::otp::{self, OtpDelivery, OtpProvider};
use super::auth::password::{hash_secret, verify_secret, MIN_PASSWORD_LEN};
use super::auth::token::TokenIssuer;
use super::{RequestHandler, Responder, Service, ServiceError};
use crate::{
    models::users::{
        Identifier, NewUser, OtpIssued, OtpLoginRequest, PasswordLoginRequest, RegisterRequest,
        Session, User, VerifyOtpRequest,
    },
    repositories::{is_unique_violation, users::UserRepository},
};

const DEFAULT_OTP_METHOD: &str = "sms";
const DUPLICATE_USER: &str = "A user with this email or phone already exists.";

pub enum UserRequest {
    RequestOtp {
        request: OtpLoginRequest,
        response: Responder<OtpIssued>,
    },
    VerifyOtp {
        request: VerifyOtpRequest,
        response: Responder<Session>,
    },
    Register {
        request: RegisterRequest,
        response: Responder<Session>,
    },
    PasswordLogin {
        request: PasswordLoginRequest,
        response: Responder<Session>,
    },
    GetUser {
        id: String,
        response: Responder<User>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    repository: UserRepository,
    tokens: TokenIssuer,
    otp: OtpProvider,
    delivery: Arc<dyn OtpDelivery>,
}

fn identifier(email: Option<&str>, phone: Option<&str>) -> Result<Identifier, ServiceError> {
    let identifier = Identifier::from_parts(email, phone)
        .ok_or_else(|| ServiceError::Validation("Email or phone is required".to_string()))?;
    if !identifier.is_valid() {
        return Err(ServiceError::Validation(format!(
            "Invalid {}",
            identifier.column()
        )));
    }

    Ok(identifier)
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_lowercase)
}

impl UserRequestHandler {
    pub fn new(
        sql_conn: PgPool,
        tokens: TokenIssuer,
        otp: OtpProvider,
        delivery: Arc<dyn OtpDelivery>,
    ) -> Self {
        let repository = UserRepository::new(sql_conn);

        UserRequestHandler {
            repository,
            tokens,
            otp,
            delivery,
        }
    }

    fn session(&self, user: User) -> Result<Session, ServiceError> {
        let token = self.tokens.issue(&user.id, user.email.as_deref())?;
        Ok(Session { token, user })
    }

    async fn find(&self, identifier: &Identifier) -> Result<Option<User>, ServiceError> {
        self.repository
            .get_user_by_identifier(identifier)
            .await
            .map_err(ServiceError::database)
    }

    async fn request_otp(&self, request: OtpLoginRequest) -> Result<OtpIssued, ServiceError> {
        let identifier = identifier(request.email.as_deref(), request.phone.as_deref())?;
        let method = request
            .otp_method
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OTP_METHOD.to_string());

        let code = self.otp.issue();
        let otp_hash = hash_secret(code.code.clone()).await?;

        let (user_id, created) = match self.find(&identifier).await? {
            Some(user) => {
                self.repository
                    .set_otp(&user.id, &otp_hash, code.expires_at)
                    .await
                    .map_err(ServiceError::database)?;
                (user.id, false)
            }
            None => {
                // Both handles were sent: the secondary one must not belong
                // to somebody else.
                let email = normalized(request.email.as_deref());
                let phone = normalized(request.phone.as_deref());
                if let (Some(_), Some(phone)) = (&email, &phone) {
                    let other = Identifier::Phone(phone.clone());
                    if self.find(&other).await?.is_some() {
                        return Err(ServiceError::Validation(DUPLICATE_USER.to_string()));
                    }
                }

                let user = self
                    .repository
                    .insert_user(NewUser {
                        email,
                        phone,
                        name: None,
                        password_hash: None,
                        otp_hash: Some(otp_hash),
                        otp_expires_at: Some(code.expires_at),
                    })
                    .await
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            ServiceError::Validation(DUPLICATE_USER.to_string())
                        } else {
                            ServiceError::database(e)
                        }
                    })?;
                (user.id, true)
            }
        };

        self.delivery
            .deliver(&identifier, &method, &code.code)
            .await
            .map_err(|e| ServiceError::upstream("OtpDelivery", e))?;

        log::info!("Issued OTP for user {} via {}.", user_id, method);

        Ok(OtpIssued {
            user_id,
            created,
            method,
        })
    }

    async fn verify_otp(&self, request: VerifyOtpRequest) -> Result<Session, ServiceError> {
        let code = request
            .otp
            .map(|otp| otp.trim().to_string())
            .filter(|otp| !otp.is_empty())
            .ok_or_else(|| {
                ServiceError::Validation("OTP and email or phone are required".to_string())
            })?;
        let identifier = identifier(request.email.as_deref(), request.phone.as_deref())?;

        let user = self
            .find(&identifier)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        let otp_hash = match &user.otp_hash {
            Some(hash) if !otp::is_expired(user.otp_expires_at, Utc::now()) => hash.clone(),
            Some(_) => return Err(ServiceError::Unauthorized("OTP expired".to_string())),
            None => return Err(ServiceError::Unauthorized("Invalid OTP".to_string())),
        };

        if !self.otp.is_well_formed(&code) || !verify_secret(code, otp_hash.clone()).await? {
            let cleared = self
                .repository
                .record_otp_failure(&user.id, &otp_hash, self.otp.max_attempts())
                .await
                .map_err(ServiceError::database)?;
            if cleared {
                log::warn!("Discarded OTP for user {} after repeated failures.", user.id);
                return Err(ServiceError::Unauthorized(
                    "Too many failed attempts. Request a new OTP".to_string(),
                ));
            }
            log::warn!("Rejected OTP for user {}.", user.id);
            return Err(ServiceError::Unauthorized("Invalid OTP".to_string()));
        }

        let consumed = self
            .repository
            .consume_otp(&user.id, &otp_hash)
            .await
            .map_err(ServiceError::database)?;
        if !consumed {
            return Err(ServiceError::Unauthorized("Invalid OTP".to_string()));
        }

        log::info!("User {} signed in with OTP.", user.id);

        self.session(user)
    }

    async fn register(&self, request: RegisterRequest) -> Result<Session, ServiceError> {
        identifier(request.email.as_deref(), request.phone.as_deref())?;
        let password = request
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ServiceError::Validation("Password is required".to_string()))?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let password_hash = hash_secret(password).await?;
        let user = self
            .repository
            .insert_user(NewUser {
                email: normalized(request.email.as_deref()),
                phone: normalized(request.phone.as_deref()),
                name: request
                    .name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty()),
                password_hash: Some(password_hash),
                otp_hash: None,
                otp_expires_at: None,
            })
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ServiceError::Conflict(DUPLICATE_USER.to_string())
                } else {
                    ServiceError::database(e)
                }
            })?;

        log::info!("Registered user {}.", user.id);

        self.session(user)
    }

    async fn password_login(&self, request: PasswordLoginRequest) -> Result<Session, ServiceError> {
        let password = request.password.filter(|p| !p.is_empty()).ok_or_else(|| {
            ServiceError::Validation("Password and email or phone are required".to_string())
        })?;
        let identifier = identifier(request.email.as_deref(), request.phone.as_deref())?;

        let invalid = || ServiceError::Unauthorized("Invalid credentials".to_string());
        let user = self.find(&identifier).await?.ok_or_else(invalid)?;
        let hash = user.password_hash.clone().ok_or_else(invalid)?;

        if !verify_secret(password, hash).await? {
            log::warn!("Failed password login for user {}.", user.id);
            return Err(invalid());
        }

        self.session(user)
    }

    async fn get_user(&self, id: &str) -> Result<User, ServiceError> {
        self.repository
            .get_user_by_id(id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::RequestOtp { request, response } => {
                let issued = self.request_otp(request).await;
                let _ = response.send(issued);
            }
            UserRequest::VerifyOtp { request, response } => {
                let session = self.verify_otp(request).await;
                let _ = response.send(session);
            }
            UserRequest::Register { request, response } => {
                let session = self.register(request).await;
                let _ = response.send(session);
            }
            UserRequest::PasswordLogin { request, response } => {
                let session = self.password_login(request).await;
                let _ = response.send(session);
            }
            UserRequest::GetUser { id, response } => {
                let user = self.get_user(&id).await;
                let _ = response.send(user);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}
