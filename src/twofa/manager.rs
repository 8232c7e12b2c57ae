/// Two-factor persistence
use super::{
    build_totp, check_code, device_name, generate_backup_code, generate_secret,
    normalize_backup_code, TotpSetup, TrustedDevice, TwoFactorStatus, BACKUP_CODE_COUNT,
    TRUSTED_DEVICE_DAYS,
};
use crate::{
    auth::SecretHasher,
    error::{ApiError, ApiResult},
};
use chrono::{Duration, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::info;
use uuid::Uuid;

const DEVICE_COLUMNS: &str =
    "id, device_id, device_name, ip_address, expires_at, last_used_at, created_at";

pub struct TwoFactorManager {
    db: PgPool,
    hasher: SecretHasher,
}

impl TwoFactorManager {
    pub fn new(db: PgPool, hasher: SecretHasher) -> Self {
        Self { db, hasher }
    }

    /// Store a new, not yet enabled secret (replacing any previous one)
    pub async fn generate(&self, user_id: Uuid, account_name: &str) -> ApiResult<TotpSetup> {
        let secret = generate_secret();
        let totp = build_totp(&secret, account_name)?;

        sqlx::query(
            r#"
            INSERT INTO twofa (user_id, secret, enabled)
            VALUES ($1, $2, FALSE)
            ON CONFLICT (user_id) DO UPDATE
                SET secret = EXCLUDED.secret, enabled = FALSE, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(&secret)
        .execute(&self.db)
        .await?;

        Ok(TotpSetup {
            qr_url: totp.get_url(),
            secret,
        })
    }

    /// Confirm a code against the stored secret and enable 2FA
    pub async fn verify(&self, user_id: Uuid, account_name: &str, code: &str) -> ApiResult<()> {
        self.check_totp(user_id, account_name, code).await?;

        sqlx::query("UPDATE twofa SET enabled = TRUE, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        info!("2FA enabled for user {}", user_id);
        Ok(())
    }

    pub async fn disable(&self, user_id: Uuid, account_name: &str, code: &str) -> ApiResult<()> {
        self.check_totp(user_id, account_name, code).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE twofa SET enabled = FALSE, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("2FA disabled for user {}", user_id);
        Ok(())
    }

    pub async fn status(&self, user_id: Uuid) -> ApiResult<TwoFactorStatus> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE((SELECT enabled FROM twofa WHERE user_id = $1), FALSE) AS enabled,
                (SELECT COUNT(*) FROM backup_codes
                 WHERE user_id = $1 AND used_at IS NULL)::BIGINT AS backup_codes,
                (SELECT COUNT(*) FROM trusted_devices
                 WHERE user_id = $1 AND expires_at > NOW())::BIGINT AS devices
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(TwoFactorStatus {
            enabled: row.try_get("enabled")?,
            backup_codes_remaining: row.try_get("backup_codes")?,
            trusted_devices: row.try_get("devices")?,
        })
    }

    pub async fn is_enabled(&self, user_id: Uuid) -> ApiResult<bool> {
        let enabled: Option<bool> =
            sqlx::query_scalar("SELECT enabled FROM twofa WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(enabled.unwrap_or(false))
    }

    /// Replace the user's backup codes; plaintext is returned once
    pub async fn generate_backup_codes(&self, user_id: Uuid) -> ApiResult<Vec<String>> {
        if !self.is_enabled(user_id).await? {
            return Err(ApiError::NotFound("2FA not enabled".to_string()));
        }

        let codes: Vec<String> = (0..BACKUP_CODE_COUNT).map(|_| generate_backup_code()).collect();
        let hasher = self.hasher.clone();
        let to_hash = codes.clone();
        let hashes = tokio::task::spawn_blocking(move || {
            to_hash
                .iter()
                .map(|code| hasher.hash(code))
                .collect::<ApiResult<Vec<_>>>()
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Hashing task failed: {}", e)))??;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for hash in &hashes {
            sqlx::query("INSERT INTO backup_codes (id, user_id, code_hash) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4())
                .bind(user_id)
                .bind(hash)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!("Issued {} backup codes for user {}", codes.len(), user_id);
        Ok(codes)
    }

    /// Consume a backup code
    pub async fn verify_backup_code(&self, user_id: Uuid, code: &str) -> ApiResult<()> {
        let candidates: Vec<(Uuid, String)> = sqlx::query(
            "SELECT id, code_hash FROM backup_codes WHERE user_id = $1 AND used_at IS NULL",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?
        .iter()
        .map(|row| -> ApiResult<(Uuid, String)> {
            Ok((row.try_get("id")?, row.try_get("code_hash")?))
        })
        .collect::<ApiResult<_>>()?;

        let hasher = self.hasher.clone();
        let code = normalize_backup_code(code);
        let matched = tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .find(|(_, hash)| hasher.verify(&code, hash))
                .map(|(id, _)| id)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Verification task failed: {}", e)))?
        .ok_or_else(|| ApiError::Authentication("invalid backup code".to_string()))?;

        let consumed = sqlx::query(
            "UPDATE backup_codes SET used_at = NOW() WHERE id = $1 AND used_at IS NULL",
        )
        .bind(matched)
        .execute(&self.db)
        .await?;
        if consumed.rows_affected() == 0 {
            return Err(ApiError::Authentication("invalid backup code".to_string()));
        }

        Ok(())
    }

    /// Trust a device for 30 days; re-trusting renews the expiry
    pub async fn trust_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        user_agent: &str,
        ip: &str,
    ) -> ApiResult<TrustedDevice> {
        let device_id = device_id.trim();
        if device_id.is_empty() || device_id.len() > 200 {
            return Err(ApiError::Validation("device_id: must be 1-200 characters".to_string()));
        }

        let expires_at = Utc::now() + Duration::days(TRUSTED_DEVICE_DAYS);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO trusted_devices
                (id, user_id, device_id, device_name, ip_address, user_agent, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, device_id) DO UPDATE
                SET device_name = EXCLUDED.device_name,
                    ip_address = EXCLUDED.ip_address,
                    user_agent = EXCLUDED.user_agent,
                    expires_at = EXCLUDED.expires_at,
                    last_used_at = NOW()
            RETURNING {}
            "#,
            DEVICE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(device_id)
        .bind(device_name(user_agent))
        .bind(ip)
        .bind(user_agent)
        .bind(expires_at)
        .fetch_one(&self.db)
        .await?;

        device_from_row(&row)
    }

    pub async fn is_trusted(&self, user_id: Uuid, device_id: &str) -> ApiResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trusted_devices SET last_used_at = NOW()
            WHERE user_id = $1 AND device_id = $2 AND expires_at > NOW()
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_devices(&self, user_id: Uuid) -> ApiResult<Vec<TrustedDevice>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trusted_devices WHERE user_id = $1 AND expires_at > NOW()
             ORDER BY last_used_at DESC",
            DEVICE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(device_from_row).collect()
    }

    /// Remove a trusted device owned by the user
    pub async fn revoke_device(&self, user_id: Uuid, id: Uuid) -> ApiResult<TrustedDevice> {
        let row = sqlx::query(&format!(
            "DELETE FROM trusted_devices WHERE id = $1 AND user_id = $2 RETURNING {}",
            DEVICE_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("device not found".to_string()))?;

        device_from_row(&row)
    }

    pub async fn cleanup_expired_devices(&self) -> ApiResult<u64> {
        let result = sqlx::query("DELETE FROM trusted_devices WHERE expires_at < NOW()")
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn check_totp(&self, user_id: Uuid, account_name: &str, code: &str) -> ApiResult<()> {
        let secret: String = sqlx::query_scalar("SELECT secret FROM twofa WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ApiError::NotFound("2FA not set up".to_string()))?;

        let totp = build_totp(&secret, account_name)?;
        if !check_code(&totp, code) {
            return Err(ApiError::Authentication("invalid code".to_string()));
        }
        Ok(())
    }

    /// Check a code for an already enabled 2FA setup
    pub async fn check_enabled_code(
        &self,
        user_id: Uuid,
        account_name: &str,
        code: &str,
    ) -> ApiResult<()> {
        if !self.is_enabled(user_id).await? {
            return Err(ApiError::NotFound("2FA not enabled".to_string()));
        }
        self.check_totp(user_id, account_name, code).await
    }
}

fn device_from_row(row: &PgRow) -> ApiResult<TrustedDevice> {
    Ok(TrustedDevice {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        device_name: row.try_get("device_name")?,
        ip_address: row.try_get("ip_address")?,
        expires_at: row.try_get("expires_at")?,
        last_used_at: row.try_get("last_used_at")?,
        created_at: row.try_get("created_at")?,
    })
}
