/// Account management system
///
/// Handles registration, password login, refresh-token rotation, email
/// verification codes and the Telegram-linked accounts.

mod manager;

pub use manager::AccountManager;

use crate::auth::{Role, TokenPair, TokenSubject};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

/// Lifetime of an emailed verification code, in minutes
pub const VERIFICATION_CODE_TTL_MINUTES: i64 = 15;

/// Synthetic mailbox domain for accounts created from Telegram
pub const TELEGRAM_EMAIL_DOMAIN: &str = "placeholder.com";

/// Stored user
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub role: Role,
    pub email_verified: bool,
    pub is_active: bool,
    pub telegram_id: Option<i64>,
    pub telegram_username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn subject(&self) -> TokenSubject {
        TokenSubject {
            user_id: self.id,
            email: self.email.clone(),
            role: self.role,
        }
    }
}

/// Registration request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "invalid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Where a login came from
#[derive(Debug, Clone, Default)]
pub struct LoginContext {
    pub ip: String,
    pub user_agent: String,
}

/// Successful password login
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub tokens: TokenPair,
    /// Previous login came from a different address
    pub new_ip: bool,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(Box<Session>),
    VerificationRequired { user_id: Uuid },
}

/// Six decimal digits
pub fn generate_verification_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Refresh tokens are stored by digest only
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn telegram_email(telegram_id: i64) -> String {
    format!("tg_{}@{}", telegram_id, TELEGRAM_EMAIL_DOMAIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_code_shape() {
        for _ in 0..50 {
            let code = generate_verification_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_refresh_token_digest() {
        let digest = hash_refresh_token("token");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_refresh_token("token"));
        assert_ne!(digest, hash_refresh_token("token2"));
    }

    #[test]
    fn test_register_validation() {
        let request = RegisterRequest {
            email: "not-an-email".into(),
            password: "12345".into(),
            name: "".into(),
            referral_code: None,
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("name"));

        let ok = RegisterRequest {
            email: "a@example.com".into(),
            password: "123456".into(),
            name: "A".into(),
            referral_code: None,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_email_helpers() {
        assert_eq!(normalize_email("  User@Example.COM "), "user@example.com");
        assert_eq!(telegram_email(42), "tg_42@placeholder.com");
    }

    #[test]
    fn test_password_hash_is_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            name: "A".into(),
            role: Role::User,
            email_verified: true,
            is_active: true,
            telegram_id: None,
            telegram_username: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"role\":\"user\""));
    }
}
