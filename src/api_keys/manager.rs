/// API key persistence and verification
use super::{find_matching_key, generate_raw_key, ApiKeyRecord, ProviderCredentials};
use crate::{
    auth::SecretHasher,
    error::{ApiError, ApiResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

const KEY_COLUMNS: &str = "id, user_id, name, key_hash, credentials, quota_limit, quota_used, \
                           is_active, last_used_at, created_at, updated_at";

/// Fields an admin may change on an existing key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiKeyUpdate {
    pub quota_limit: Option<i64>,
    pub is_active: Option<bool>,
    pub credentials: Option<ProviderCredentials>,
}

/// Key listing row for the admin panel
#[derive(Debug, Clone, Serialize)]
pub struct AdminApiKeyView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_email: String,
    pub name: String,
    pub quota_limit: i64,
    pub quota_used: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// API key manager
pub struct ApiKeyManager {
    db: PgPool,
    hasher: SecretHasher,
}

impl ApiKeyManager {
    pub fn new(db: PgPool, hasher: SecretHasher) -> Self {
        Self { db, hasher }
    }

    /// Create a key and return the only plaintext copy of its secret
    pub async fn generate(
        &self,
        user_id: Uuid,
        name: &str,
        credentials: ProviderCredentials,
        quota_limit: i64,
    ) -> ApiResult<(String, ApiKeyRecord)> {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("name: key name is required".to_string()));
        }
        if quota_limit < super::UNLIMITED {
            return Err(ApiError::Validation("quota_limit: must be -1 or non-negative".to_string()));
        }

        let raw_key = generate_raw_key();
        let key_hash = self.hasher.hash(&raw_key)?;
        let credentials_json = serde_json::to_value(&credentials)
            .map_err(|e| ApiError::Internal(format!("Failed to encode credentials: {}", e)))?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO api_keys
                (id, user_id, name, key_hash, credentials, quota_limit, quota_used, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, 0, TRUE)
            RETURNING {}
            "#,
            KEY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name.trim())
        .bind(&key_hash)
        .bind(credentials_json)
        .bind(quota_limit)
        .fetch_one(&self.db)
        .await?;

        let record = record_from_row(&row)?;
        tracing::info!(
            "Generated API key {} for user {} (quota {})",
            record.id,
            user_id,
            quota_limit
        );

        Ok((raw_key, record))
    }

    /// Find the active key matching a raw secret. Revoked and disabled keys
    /// never match.
    pub async fn verify(&self, raw_key: &str) -> ApiResult<Option<ApiKeyRecord>> {
        if !raw_key.starts_with(super::KEY_PREFIX) {
            return Ok(None);
        }

        let rows = sqlx::query(&format!(
            "SELECT {} FROM api_keys WHERE is_active = TRUE",
            KEY_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        let candidates = rows
            .iter()
            .map(record_from_row)
            .collect::<ApiResult<Vec<_>>>()?;

        // Hash comparisons are CPU-bound; keep them off the async workers
        let hasher = self.hasher.clone();
        let raw_key = raw_key.to_string();
        tokio::task::spawn_blocking(move || {
            find_matching_key(&hasher, &raw_key, &candidates).cloned()
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Key verification task failed: {}", e)))
    }

    /// Fetch a key regardless of its state
    pub async fn get(&self, key_id: Uuid) -> ApiResult<ApiKeyRecord> {
        let row = sqlx::query(&format!("SELECT {} FROM api_keys WHERE id = $1", KEY_COLUMNS))
            .bind(key_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ApiError::NotFound("API key not found".to_string()))?;

        record_from_row(&row)
    }

    /// Additive usage update; concurrent increments are not coordinated
    pub async fn increment_quota_used(&self, key_id: Uuid, tokens: i64) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE api_keys
            SET quota_used = quota_used + $1, last_used_at = NOW(), updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(tokens)
        .bind(key_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> ApiResult<Vec<ApiKeyRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC",
            KEY_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Deactivate a key owned by `owner_id`; the row is kept
    pub async fn revoke(&self, key_id: Uuid, owner_id: Uuid) -> ApiResult<()> {
        let result = sqlx::query(
            "UPDATE api_keys SET is_active = FALSE, updated_at = NOW()
             WHERE id = $1 AND user_id = $2",
        )
        .bind(key_id)
        .bind(owner_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("API key not found".to_string()));
        }

        tracing::info!("Revoked API key {} for user {}", key_id, owner_id);
        Ok(())
    }

    pub async fn update(&self, key_id: Uuid, update: ApiKeyUpdate) -> ApiResult<ApiKeyRecord> {
        if let Some(limit) = update.quota_limit {
            if limit < super::UNLIMITED {
                return Err(ApiError::Validation(
                    "quota_limit: must be -1 or non-negative".to_string(),
                ));
            }
        }

        let credentials_json = match &update.credentials {
            Some(creds) => Some(serde_json::to_value(creds).map_err(|e| {
                ApiError::Internal(format!("Failed to encode credentials: {}", e))
            })?),
            None => None,
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE api_keys
            SET quota_limit = COALESCE($1, quota_limit),
                is_active = COALESCE($2, is_active),
                credentials = COALESCE($3, credentials),
                updated_at = NOW()
            WHERE id = $4
            RETURNING {}
            "#,
            KEY_COLUMNS
        ))
        .bind(update.quota_limit)
        .bind(update.is_active)
        .bind(credentials_json)
        .bind(key_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("API key not found".to_string()))?;

        record_from_row(&row)
    }

    pub async fn delete(&self, key_id: Uuid) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(key_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("API key not found".to_string()));
        }
        Ok(())
    }

    pub async fn count(&self) -> ApiResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM api_keys")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    pub async fn list_all(&self) -> ApiResult<Vec<AdminApiKeyView>> {
        let rows = sqlx::query(
            r#"
            SELECT k.id, k.user_id, u.email, k.name, k.quota_limit, k.quota_used,
                   k.is_active, k.created_at
            FROM api_keys k
            JOIN users u ON u.id = k.user_id
            ORDER BY k.created_at DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> ApiResult<AdminApiKeyView> {
                Ok(AdminApiKeyView {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    user_email: row.try_get("email")?,
                    name: row.try_get("name")?,
                    quota_limit: row.try_get("quota_limit")?,
                    quota_used: row.try_get("quota_used")?,
                    is_active: row.try_get("is_active")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

fn record_from_row(row: &PgRow) -> ApiResult<ApiKeyRecord> {
    let credentials: serde_json::Value = row.try_get("credentials")?;
    let credentials = serde_json::from_value(credentials).unwrap_or_else(|e| {
        tracing::warn!("Ignoring malformed provider credentials: {}", e);
        ProviderCredentials::default()
    });

    Ok(ApiKeyRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        key_hash: row.try_get("key_hash")?,
        credentials,
        quota_limit: row.try_get("quota_limit")?,
        quota_used: row.try_get("quota_used")?,
        is_active: row.try_get("is_active")?,
        last_used_at: row.try_get("last_used_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
