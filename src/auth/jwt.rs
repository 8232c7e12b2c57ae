/// JWT access/refresh token pairs
///
/// Access and refresh tokens are signed with different secrets, so an access
/// token can never be replayed against the refresh endpoint.
use super::Role;
use crate::{
    config::AuthConfig,
    error::{ApiError, ApiResult},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const ISSUER: &str = "saaspro";

/// Kind of token carried in the `type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Claims carried by both token kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iss: String,
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Identity a token pair is issued for
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Signing keys and lifetimes
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_expiry: Duration,
    refresh_expiry: Duration,
    remember_access_expiry: Duration,
    remember_refresh_expiry: Duration,
}

impl JwtKeys {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_expiry: config.access_expiry,
            refresh_expiry: config.refresh_expiry,
            remember_access_expiry: config.remember_access_expiry,
            remember_refresh_expiry: config.remember_refresh_expiry,
        }
    }

    /// Lifetimes for a pair, selected by the remember-me flag
    pub fn expiries(&self, remember_me: bool) -> (Duration, Duration) {
        if remember_me {
            (self.remember_access_expiry, self.remember_refresh_expiry)
        } else {
            (self.access_expiry, self.refresh_expiry)
        }
    }

    pub fn generate_token_pair(
        &self,
        subject: &TokenSubject,
        remember_me: bool,
    ) -> ApiResult<TokenPair> {
        let (access_ttl, refresh_ttl) = self.expiries(remember_me);
        let now = Utc::now();

        let access_token = self.sign(subject, TokenType::Access, now, access_ttl)?;
        let refresh_token = self.sign(subject, TokenType::Refresh, now, refresh_ttl)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: access_ttl.as_secs() as i64,
            refresh_expires_at: now + to_chrono(refresh_ttl)?,
        })
    }

    fn sign(
        &self,
        subject: &TokenSubject,
        token_type: TokenType,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> ApiResult<String> {
        let iat = now.timestamp();
        let claims = Claims {
            user_id: subject.user_id,
            email: subject.email.clone(),
            role: subject.role,
            token_type,
            iss: ISSUER.to_string(),
            sub: subject.user_id.to_string(),
            jti: Uuid::new_v4().simple().to_string(),
            iat,
            nbf: iat,
            exp: iat + ttl.as_secs() as i64,
        };

        let key = match token_type {
            TokenType::Access => &self.access_encoding,
            TokenType::Refresh => &self.refresh_encoding,
        };

        encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| {
                ApiError::Internal(format!("Failed to sign {} token: {}", token_type.as_str(), e))
            })
    }

    pub fn validate_access_token(&self, token: &str) -> ApiResult<Claims> {
        self.validate(token, TokenType::Access)
    }

    pub fn validate_refresh_token(&self, token: &str) -> ApiResult<Claims> {
        self.validate(token, TokenType::Refresh)
    }

    fn validate(&self, token: &str, expected: TokenType) -> ApiResult<Claims> {
        let key = match expected {
            TokenType::Access => &self.access_decoding,
            TokenType::Refresh => &self.refresh_decoding,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.validate_nbf = true;
        validation.leeway = 30;

        let claims = match decode::<Claims>(token, key, &validation) {
            Ok(data) => data.claims,
            Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => {
                // A token signed with the other secret reports its kind, not a bad signature
                if let Some(actual) = unverified_token_type(token) {
                    if actual != expected {
                        return Err(wrong_type(expected));
                    }
                }
                tracing::warn!("JWT verification failed: {}", e);
                return Err(ApiError::Jwt("invalid token signature".to_string()));
            }
            Err(e) => {
                tracing::debug!("JWT verification failed: {}", e);
                return Err(match e.kind() {
                    ErrorKind::ExpiredSignature => ApiError::Jwt("token has expired".to_string()),
                    _ => ApiError::Jwt(format!("invalid token: {}", e)),
                });
            }
        };

        if claims.token_type != expected {
            return Err(wrong_type(expected));
        }

        Ok(claims)
    }
}

fn wrong_type(expected: TokenType) -> ApiError {
    let message = match expected {
        TokenType::Access => "token is not an access token",
        TokenType::Refresh => "token is not a refresh token",
    };
    ApiError::Jwt(message.to_string())
}

fn unverified_token_type(token: &str) -> Option<TokenType> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims.token_type)
}

fn to_chrono(duration: Duration) -> ApiResult<ChronoDuration> {
    ChronoDuration::from_std(duration)
        .map_err(|e| ApiError::Internal(format!("Invalid token lifetime: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn keys() -> JwtKeys {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        JwtKeys::from_config(&config.auth)
    }

    fn subject(role: Role) -> TokenSubject {
        TokenSubject {
            user_id: Uuid::new_v4(),
            email: "a@b.com".to_string(),
            role,
        }
    }

    #[test]
    fn test_round_trip_recovers_identity() {
        let keys = keys();
        let subject = subject(Role::Admin);
        let pair = keys.generate_token_pair(&subject, false).unwrap();

        let claims = keys.validate_access_token(&pair.access_token).unwrap();
        assert_eq!(claims.user_id, subject.user_id);
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(claims.iss, ISSUER);

        let refresh = keys.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(refresh.user_id, subject.user_id);
        assert_eq!(refresh.token_type, TokenType::Refresh);
    }

    #[test]
    fn test_default_expiries() {
        let keys = keys();
        let pair = keys.generate_token_pair(&subject(Role::User), false).unwrap();

        let access = keys.validate_access_token(&pair.access_token).unwrap();
        let refresh = keys.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(access.exp - access.iat, 15 * 60);
        assert_eq!(refresh.exp - refresh.iat, 24 * 3600);
        assert_eq!(pair.expires_in, 15 * 60);
    }

    #[test]
    fn test_remember_me_expiries() {
        let keys = keys();
        let pair = keys.generate_token_pair(&subject(Role::User), true).unwrap();

        let access = keys.validate_access_token(&pair.access_token).unwrap();
        let refresh = keys.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(access.exp - access.iat, 30 * 86400);
        assert_eq!(refresh.exp - refresh.iat, 90 * 86400);
    }

    #[test]
    fn test_wrong_token_type_is_rejected() {
        let keys = keys();
        let pair = keys.generate_token_pair(&subject(Role::User), false).unwrap();

        let err = keys.validate_access_token(&pair.refresh_token).unwrap_err();
        assert_eq!(err.to_string(), "token is not an access token");

        let err = keys.validate_refresh_token(&pair.access_token).unwrap_err();
        assert_eq!(err.to_string(), "token is not a refresh token");
    }

    #[test]
    fn test_foreign_secret_is_rejected() {
        let keys = keys();
        let config = ServerConfig::from_lookup(|key| match key {
            "JWT_ACCESS_SECRET" => Some("another-access".to_string()),
            "JWT_REFRESH_SECRET" => Some("another-refresh".to_string()),
            _ => None,
        })
        .unwrap();
        let foreign = JwtKeys::from_config(&config.auth);
        let pair = foreign.generate_token_pair(&subject(Role::User), false).unwrap();

        let err = keys.validate_access_token(&pair.access_token).unwrap_err();
        assert_eq!(err.to_string(), "invalid token signature");
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let keys = keys();
        let subject = subject(Role::User);
        let past = Utc::now() - ChronoDuration::hours(2);
        let token = keys
            .sign(&subject, TokenType::Access, past, Duration::from_secs(60))
            .unwrap();

        let err = keys.validate_access_token(&token).unwrap_err();
        assert_eq!(err.to_string(), "token has expired");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(keys().validate_access_token("not-a-jwt").is_err());
    }
}
