/// Telegram Mini App (WebApp) authentication
///
/// The WebApp hands the page a signed `initData` query string. The signature
/// key is `HMAC_SHA256(key = "WebAppData", msg = bot_token)` and the signed
/// message is every other field as sorted `key=value` lines.
use crate::error::ApiError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// How long a signed initData stays acceptable, in seconds
pub const MAX_INIT_DATA_AGE_SECS: i64 = 86_400;

#[derive(Debug, Error, PartialEq)]
pub enum InitDataError {
    #[error("initData is malformed")]
    Malformed,
    #[error("initData has no hash")]
    MissingHash,
    #[error("initData signature mismatch")]
    BadSignature,
    #[error("initData is too old")]
    Expired,
    #[error("initData has no user")]
    MissingUser,
}

impl From<InitDataError> for ApiError {
    fn from(err: InitDataError) -> Self {
        tracing::debug!("Rejected WebApp initData: {}", err);
        ApiError::Authentication("invalid initData".to_string())
    }
}

/// Telegram user carried in initData
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebAppUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

fn decode_component(raw: &str) -> Result<String, InitDataError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|value| value.into_owned())
        .map_err(|_| InitDataError::Malformed)
}

fn parse_pairs(init_data: &str) -> Result<Vec<(String, String)>, InitDataError> {
    init_data
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok((decode_component(key)?, decode_component(value)?))
        })
        .collect()
}

fn secret_key(bot_token: &str) -> Result<Vec<u8>, InitDataError> {
    let mut mac =
        HmacSha256::new_from_slice(b"WebAppData").map_err(|_| InitDataError::Malformed)?;
    mac.update(bot_token.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Sorted `key=value` lines of every field except `hash`
pub fn data_check_string(pairs: &[(String, String)]) -> String {
    let mut lines: Vec<String> = pairs
        .iter()
        .filter(|(key, _)| key != "hash")
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Verify an initData string and return the embedded user.
///
/// `now` is a unix timestamp.
pub fn validate_init_data(
    init_data: &str,
    bot_token: &str,
    now: i64,
) -> Result<WebAppUser, InitDataError> {
    let pairs = parse_pairs(init_data)?;

    let hash = pairs
        .iter()
        .find(|(key, _)| key == "hash")
        .map(|(_, value)| value.as_str())
        .ok_or(InitDataError::MissingHash)?;
    let expected = hex::decode(hash).map_err(|_| InitDataError::BadSignature)?;

    let mut mac = HmacSha256::new_from_slice(&secret_key(bot_token)?)
        .map_err(|_| InitDataError::Malformed)?;
    mac.update(data_check_string(&pairs).as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| InitDataError::BadSignature)?;

    let auth_date: i64 = pairs
        .iter()
        .find(|(key, _)| key == "auth_date")
        .and_then(|(_, value)| value.parse().ok())
        .ok_or(InitDataError::Malformed)?;
    if now - auth_date > MAX_INIT_DATA_AGE_SECS {
        return Err(InitDataError::Expired);
    }

    let user_json = pairs
        .iter()
        .find(|(key, _)| key == "user")
        .map(|(_, value)| value.as_str())
        .ok_or(InitDataError::MissingUser)?;
    serde_json::from_str(user_json).map_err(|_| InitDataError::MissingUser)
}

/// Produce a signed initData string (used by tests and local tooling)
pub fn sign_init_data(fields: &[(&str, &str)], bot_token: &str) -> Result<String, InitDataError> {
    let pairs: Vec<(String, String)> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut mac = HmacSha256::new_from_slice(&secret_key(bot_token)?)
        .map_err(|_| InitDataError::Malformed)?;
    mac.update(data_check_string(&pairs).as_bytes());
    let hash = hex::encode(mac.finalize().into_bytes());

    let mut encoded: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    encoded.push(format!("hash={}", hash));
    Ok(encoded.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456:ABC-DEF";
    const NOW: i64 = 1_700_000_000;

    fn signed(auth_date: i64) -> String {
        let auth_date = auth_date.to_string();
        sign_init_data(
            &[
                ("query_id", "AAE"),
                ("user", r#"{"id":42,"username":"alice","first_name":"Alice"}"#),
                ("auth_date", &auth_date),
            ],
            TOKEN,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_init_data() {
        let user = validate_init_data(&signed(NOW - 60), TOKEN, NOW).unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_wrong_token() {
        let err = validate_init_data(&signed(NOW - 60), "999:other", NOW).unwrap_err();
        assert_eq!(err, InitDataError::BadSignature);
    }

    #[test]
    fn test_tampered_field() {
        let tampered = signed(NOW - 60).replace("alice", "mallory");
        let err = validate_init_data(&tampered, TOKEN, NOW).unwrap_err();
        assert_eq!(err, InitDataError::BadSignature);
    }

    #[test]
    fn test_expired() {
        let stale = signed(NOW - MAX_INIT_DATA_AGE_SECS - 1);
        let err = validate_init_data(&stale, TOKEN, NOW).unwrap_err();
        assert_eq!(err, InitDataError::Expired);
        assert!(validate_init_data(&signed(NOW - MAX_INIT_DATA_AGE_SECS), TOKEN, NOW).is_ok());
    }

    #[test]
    fn test_missing_hash() {
        let err = validate_init_data("auth_date=1&user=%7B%7D", TOKEN, NOW).unwrap_err();
        assert_eq!(err, InitDataError::MissingHash);
    }

    #[test]
    fn test_data_check_string_is_sorted() {
        let pairs = vec![
            ("user".to_string(), "u".to_string()),
            ("hash".to_string(), "h".to_string()),
            ("auth_date".to_string(), "1".to_string()),
        ];
        assert_eq!(data_check_string(&pairs), "auth_date=1\nuser=u");
    }

    #[test]
    fn test_maps_to_generic_authentication_error() {
        let err: ApiError = InitDataError::Expired.into();
        assert_eq!(err.to_string(), "invalid initData");
    }
}
