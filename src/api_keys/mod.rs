/// Per-user API keys for the AI gateway
///
/// Raw secrets are shown exactly once at creation time and only their salted
/// hash is stored. Because every hash carries its own salt, verification has
/// to scan the active keys one by one.

mod manager;

pub use manager::{AdminApiKeyView, ApiKeyManager, ApiKeyUpdate};

use crate::{
    auth::SecretHasher,
    error::{ApiError, ApiResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix every issued key starts with
pub const KEY_PREFIX: &str = "sk-saaspro-";

/// `quota_limit` value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// Upstream credentials a key owner can bring for specific providers
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deepseek: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gigachat: Option<String>,
}

impl ProviderCredentials {
    /// Names of the providers that have a credential attached
    pub fn providers(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.deepseek.is_some() {
            names.push("deepseek");
        }
        if self.openai.is_some() {
            names.push("openai");
        }
        if self.gigachat.is_some() {
            names.push("gigachat");
        }
        names
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("providers", &self.providers())
            .finish()
    }
}

/// Stored API key
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub key_hash: String,
    #[serde(skip_serializing, default)]
    pub credentials: ProviderCredentials,
    pub quota_limit: i64,
    pub quota_used: i64,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for ApiKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyRecord")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("key_hash", &"<redacted>")
            .field("credentials", &self.credentials)
            .field("quota_limit", &self.quota_limit)
            .field("quota_used", &self.quota_used)
            .field("is_active", &self.is_active)
            .finish()
    }
}

impl ApiKeyRecord {
    pub fn is_unlimited(&self) -> bool {
        self.quota_limit == UNLIMITED
    }

    /// Remaining quota, or -1 for unlimited keys
    pub fn remaining(&self) -> i64 {
        if self.is_unlimited() {
            UNLIMITED
        } else {
            (self.quota_limit - self.quota_used).max(0)
        }
    }
}

/// Whether a key with this limit and usage may make another call.
///
/// The check happens before the upstream call and the increment after it,
/// so concurrent calls near the limit can overshoot it.
pub fn quota_admits(quota_limit: i64, quota_used: i64) -> bool {
    quota_limit == UNLIMITED || quota_used < quota_limit
}

/// Gateway admission rule for a key's quota
pub struct QuotaPolicy;

impl QuotaPolicy {
    pub fn admit(quota_limit: i64, quota_used: i64) -> ApiResult<()> {
        if quota_admits(quota_limit, quota_used) {
            Ok(())
        } else {
            Err(ApiError::PaymentRequired("quota exceeded".to_string()))
        }
    }
}

/// Generate a new raw key secret
pub fn generate_raw_key() -> String {
    format!("{}{}", KEY_PREFIX, Uuid::new_v4().simple())
}

/// Linear scan over active candidate keys, comparing the raw secret against each hash
pub fn find_matching_key<'a>(
    hasher: &SecretHasher,
    raw_key: &str,
    candidates: &'a [ApiKeyRecord],
) -> Option<&'a ApiKeyRecord> {
    if !raw_key.starts_with(KEY_PREFIX) {
        return None;
    }
    candidates
        .iter()
        .filter(|candidate| candidate.is_active)
        .find(|candidate| hasher.verify(raw_key, &candidate.key_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::test_hasher;

    fn record(hasher: &SecretHasher, raw: &str, quota_limit: i64) -> ApiKeyRecord {
        ApiKeyRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "test".to_string(),
            key_hash: hasher.hash(raw).unwrap(),
            credentials: ProviderCredentials::default(),
            quota_limit,
            quota_used: 0,
            is_active: true,
            last_used_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_raw_key_format() {
        let key = generate_raw_key();
        assert!(key.starts_with(KEY_PREFIX));
        assert_eq!(key.len(), KEY_PREFIX.len() + 32);
        assert_ne!(key, generate_raw_key());
    }

    #[test]
    fn test_scan_finds_the_issued_key() {
        let hasher = test_hasher();
        let raws: Vec<String> = (0..3).map(|_| generate_raw_key()).collect();
        let records: Vec<ApiKeyRecord> = raws.iter().map(|r| record(&hasher, r, 1000)).collect();

        for (raw, expected) in raws.iter().zip(&records) {
            let found = find_matching_key(&hasher, raw, &records).unwrap();
            assert_eq!(found.id, expected.id);
        }
    }

    #[test]
    fn test_single_character_mutation_fails() {
        let hasher = test_hasher();
        let raw = generate_raw_key();
        let records = vec![record(&hasher, &raw, 1000)];

        let mut chars: Vec<char> = raw.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'a' { 'b' } else { 'a' };
        let mutated: String = chars.into_iter().collect();

        assert!(find_matching_key(&hasher, &mutated, &records).is_none());

        let truncated = &raw[..raw.len() - 1];
        assert!(find_matching_key(&hasher, truncated, &records).is_none());
    }

    #[test]
    fn test_foreign_prefix_skips_scan() {
        let hasher = test_hasher();
        let raw = generate_raw_key();
        let records = vec![record(&hasher, &raw, 1000)];
        let foreign = raw.replacen(KEY_PREFIX, "sk-other-", 1);
        assert!(find_matching_key(&hasher, &foreign, &records).is_none());
    }

    #[test]
    fn test_quota_policy() {
        assert!(quota_admits(UNLIMITED, 1_000_000));
        assert!(quota_admits(1000, 0));
        assert!(quota_admits(1000, 999));
        assert!(!quota_admits(1000, 1000));
        assert!(!quota_admits(1000, 1200));
        assert!(!quota_admits(0, 0));

        assert!(QuotaPolicy::admit(UNLIMITED, 5).is_ok());
        let err = QuotaPolicy::admit(1000, 1200).unwrap_err();
        assert!(matches!(err, ApiError::PaymentRequired(ref m) if m == "quota exceeded"));
    }

    #[test]
    fn test_revoked_key_never_matches() {
        let hasher = test_hasher();
        let raw = generate_raw_key();
        let mut revoked = record(&hasher, &raw, 1000);
        revoked.is_active = false;
        assert!(find_matching_key(&hasher, &raw, &[revoked]).is_none());
    }

    #[test]
    fn test_quota_exhausted_after_accumulated_usage() {
        // 1000 token quota, each call charges 400 after it returns
        let mut used = 0;
        for _ in 0..3 {
            assert!(QuotaPolicy::admit(1000, used).is_ok());
            used += 400;
        }
        assert_eq!(used, 1200);

        let err = QuotaPolicy::admit(1000, used).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_remaining() {
        let hasher = test_hasher();
        let mut key = record(&hasher, &generate_raw_key(), 1000);
        key.quota_used = 400;
        assert_eq!(key.remaining(), 600);
        key.quota_used = 1200;
        assert_eq!(key.remaining(), 0);
        key.quota_limit = UNLIMITED;
        assert_eq!(key.remaining(), UNLIMITED);
    }

    #[test]
    fn test_credentials_are_not_serialized_or_debugged() {
        let hasher = test_hasher();
        let mut key = record(&hasher, &generate_raw_key(), 10);
        key.credentials.openai = Some("sk-upstream-secret".to_string());

        let json = serde_json::to_string(&key).unwrap();
        assert!(!json.contains("sk-upstream-secret"));
        assert!(!json.contains("argon2"));

        let debug = format!("{:?}", key);
        assert!(!debug.contains("sk-upstream-secret"));
        assert!(debug.contains("openai"));
    }
}
