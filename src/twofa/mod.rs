/// Two-factor authentication: TOTP, backup codes and trusted devices
mod manager;

pub use manager::TwoFactorManager;

use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use totp_rs::{Algorithm, TOTP};
use uuid::Uuid;

pub const TOTP_ISSUER: &str = "SaaSPro";
pub const BACKUP_CODE_COUNT: usize = 8;
pub const BACKUP_CODE_LENGTH: usize = 12;
pub const TRUSTED_DEVICE_DAYS: i64 = 30;

/// Unambiguous base32-style alphabet (no 0/O, 1/I)
const BACKUP_CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const BASE32: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: false };

/// Freshly generated secret and its provisioning URL
#[derive(Debug, Clone, Serialize)]
pub struct TotpSetup {
    pub secret: String,
    pub qr_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub backup_codes_remaining: i64,
    pub trusted_devices: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrustedDevice {
    pub id: Uuid,
    pub device_id: String,
    pub device_name: String,
    pub ip_address: String,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Random 160-bit secret, base32 encoded
pub fn generate_secret() -> String {
    let bytes: [u8; 20] = rand::thread_rng().gen();
    base32::encode(BASE32, &bytes)
}

/// SHA1, 6 digits, 30 second step, one step of skew
pub fn build_totp(secret: &str, account_name: &str) -> ApiResult<TOTP> {
    let bytes = base32::decode(BASE32, secret)
        .ok_or_else(|| ApiError::Internal("stored TOTP secret is not base32".to_string()))?;

    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        Some(TOTP_ISSUER.to_string()),
        account_name.to_string(),
    )
    .map_err(|e| ApiError::Internal(format!("Invalid TOTP parameters: {}", e)))
}

pub fn check_code(totp: &TOTP, code: &str) -> bool {
    let code = code.trim();
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    totp.check_current(code).unwrap_or(false)
}

pub fn generate_backup_code() -> String {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_LENGTH)
        .map(|_| BACKUP_CODE_CHARSET[rng.gen_range(0..BACKUP_CODE_CHARSET.len())] as char)
        .collect()
}

/// Backup codes are matched case-insensitively and ignore separators
pub fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Short "Browser on OS" label from a user agent
pub fn device_name(user_agent: &str) -> String {
    let os = if user_agent.contains("iPhone") {
        "iPhone"
    } else if user_agent.contains("iPad") {
        "iPad"
    } else if user_agent.contains("Android") {
        "Android"
    } else if user_agent.contains("Windows") {
        "Windows"
    } else if user_agent.contains("Mac") {
        "macOS"
    } else if user_agent.contains("Linux") {
        "Linux"
    } else {
        return "Unknown device".to_string();
    };

    let browser = if user_agent.contains("Edg/") {
        Some("Edge")
    } else if user_agent.contains("Firefox/") {
        Some("Firefox")
    } else if user_agent.contains("Chrome/") {
        Some("Chrome")
    } else if user_agent.contains("Safari/") {
        Some("Safari")
    } else {
        None
    };

    match browser {
        Some(browser) => format!("{} on {}", browser, os),
        None => os.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_round_trips_through_totp() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);

        let totp = build_totp(&secret, "user@example.com").unwrap();
        let code = totp.generate_current().unwrap();
        assert!(check_code(&totp, &code));
        assert!(totp.get_url().starts_with("otpauth://totp/SaaSPro"));
    }

    #[test]
    fn test_malformed_codes_rejected() {
        let totp = build_totp(&generate_secret(), "user@example.com").unwrap();
        assert!(!check_code(&totp, "12345"));
        assert!(!check_code(&totp, "abcdef"));
        assert!(!check_code(&totp, ""));
    }

    #[test]
    fn test_invalid_secret() {
        assert!(build_totp("not base32 !!", "user@example.com").is_err());
    }

    #[test]
    fn test_backup_codes() {
        let code = generate_backup_code();
        assert_eq!(code.len(), BACKUP_CODE_LENGTH);
        assert!(code.bytes().all(|b| BACKUP_CODE_CHARSET.contains(&b)));
        assert_eq!(normalize_backup_code("abcd-efgh-jkmn"), "ABCDEFGHJKMN");
    }

    #[test]
    fn test_device_names() {
        let chrome_win = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
        assert_eq!(device_name(chrome_win), "Chrome on Windows");

        let safari_iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
                             AppleWebKit/605.1.15 Version/17.0 Mobile/15E148 Safari/604.1";
        assert_eq!(device_name(safari_iphone), "Safari on iPhone");

        assert_eq!(device_name("curl/8.0"), "Unknown device");
    }
}
