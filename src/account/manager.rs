/// Account manager implementation using runtime queries
use super::{
    generate_verification_code, hash_refresh_token, normalize_email, telegram_email,
    LoginContext, LoginOutcome, LoginRequest, RegisterRequest, Session, User,
    VERIFICATION_CODE_TTL_MINUTES,
};
use crate::{
    auth::{JwtKeys, Role, SecretHasher, TokenPair},
    error::{ApiError, ApiResult},
};
use chrono::{Duration, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

const USER_COLUMNS: &str = "id, email, password_hash, name, role, email_verified, is_active, \
                            telegram_id, telegram_username, created_at, updated_at";

/// Account manager service
pub struct AccountManager {
    db: PgPool,
    hasher: SecretHasher,
    jwt: Arc<JwtKeys>,
}

impl AccountManager {
    pub fn new(db: PgPool, hasher: SecretHasher, jwt: Arc<JwtKeys>) -> Self {
        Self { db, hasher, jwt }
    }

    /// Create an unverified user
    pub async fn register(&self, request: &RegisterRequest) -> ApiResult<User> {
        request.validate()?;
        let email = normalize_email(&request.email);

        if self.email_exists(&email).await? {
            return Err(ApiError::BadRequest("Email already registered".to_string()));
        }

        let password_hash = self.hash_blocking(request.password.clone()).await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, name, role, email_verified, is_active)
            VALUES ($1, $2, $3, $4, 'user', FALSE, TRUE)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&password_hash)
        .bind(request.name.trim())
        .fetch_one(&self.db)
        .await
        .map_err(|e| {
            if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
                ApiError::BadRequest("Email already registered".to_string())
            } else {
                ApiError::Database(e)
            }
        })?;

        let user = user_from_row(&row)?;
        info!("Registered user {} ({})", user.id, user.email);
        Ok(user)
    }

    /// Password login
    pub async fn login(
        &self,
        request: &LoginRequest,
        context: &LoginContext,
    ) -> ApiResult<LoginOutcome> {
        request.validate()?;
        let invalid = || ApiError::Authentication("Invalid email or password".to_string());

        let user = self
            .find_by_email(&normalize_email(&request.email))
            .await?
            .ok_or_else(invalid)?;

        if !self
            .verify_blocking(request.password.clone(), user.password_hash.clone())
            .await?
        {
            return Err(invalid());
        }

        if !user.is_active {
            warn!("Blocked user {} attempted to log in", user.id);
            return Err(ApiError::Authorization("account is blocked".to_string()));
        }

        if !user.email_verified {
            return Ok(LoginOutcome::VerificationRequired { user_id: user.id });
        }

        let last_ip: Option<String> = sqlx::query_scalar(
            "SELECT ip_address FROM login_history WHERE user_id = $1
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(user.id)
        .fetch_optional(&self.db)
        .await?;

        sqlx::query(
            "INSERT INTO login_history (user_id, ip_address, user_agent) VALUES ($1, $2, $3)",
        )
        .bind(user.id)
        .bind(&context.ip)
        .bind(&context.user_agent)
        .execute(&self.db)
        .await?;

        let tokens = self.issue_tokens(&user, request.remember_me).await?;
        let new_ip = matches!(&last_ip, Some(previous) if previous != &context.ip);

        info!("User {} logged in", user.id);
        Ok(LoginOutcome::Authenticated(Box::new(Session { user, tokens, new_ip })))
    }

    /// Sign a token pair and persist the refresh token digest
    pub async fn issue_tokens(&self, user: &User, remember_me: bool) -> ApiResult<TokenPair> {
        let tokens = self.jwt.generate_token_pair(&user.subject(), remember_me)?;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, remember_me, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(hash_refresh_token(&tokens.refresh_token))
        .bind(remember_me)
        .bind(tokens.refresh_expires_at)
        .execute(&self.db)
        .await?;

        Ok(tokens)
    }

    /// Rotate a refresh token: the presented token is revoked and a new pair issued
    pub async fn refresh(&self, refresh_token: &str) -> ApiResult<(User, TokenPair)> {
        let claims = self.jwt.validate_refresh_token(refresh_token)?;
        let token_hash = hash_refresh_token(refresh_token);

        let mut tx = self.db.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked_at = NOW()
            WHERE token_hash = $1 AND user_id = $2 AND revoked_at IS NULL AND expires_at > NOW()
            RETURNING remember_me
            "#,
        )
        .bind(&token_hash)
        .bind(claims.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::Authentication("refresh token revoked or expired".to_string()))?;
        let remember_me: bool = row.try_get("remember_me")?;

        let user_row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(claims.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::Authentication("user no longer exists".to_string()))?;
        let user = user_from_row(&user_row)?;

        if !user.is_active {
            return Err(ApiError::Authorization("account is blocked".to_string()));
        }

        let tokens = self.jwt.generate_token_pair(&user.subject(), remember_me)?;
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, remember_me, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(hash_refresh_token(&tokens.refresh_token))
        .bind(remember_me)
        .bind(tokens.refresh_expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((user, tokens))
    }

    /// Revoke a refresh token; unknown tokens are ignored
    pub async fn logout(&self, refresh_token: &str) -> ApiResult<()> {
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW()
             WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(hash_refresh_token(refresh_token))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Store a fresh code for the user and return it for delivery
    pub async fn issue_verification_code(&self, user_id: Uuid, kind: &str) -> ApiResult<String> {
        let code = generate_verification_code();
        let expires_at = Utc::now() + Duration::minutes(VERIFICATION_CODE_TTL_MINUTES);

        sqlx::query(
            r#"
            INSERT INTO verification_codes (id, user_id, code, kind, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&code)
        .bind(kind)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(code)
    }

    /// Consume a verification code and mark the email verified
    pub async fn verify_code(&self, user_id: Uuid, code: &str) -> ApiResult<()> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, expires_at FROM verification_codes
            WHERE user_id = $1 AND code = $2 AND kind = 'email' AND used_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(code.trim())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid verification code".to_string()))?;

        let code_id: Uuid = row.try_get("id")?;
        let expires_at: chrono::DateTime<Utc> = row.try_get("expires_at")?;
        if expires_at <= Utc::now() {
            return Err(ApiError::BadRequest("Verification code expired".to_string()));
        }

        sqlx::query("UPDATE verification_codes SET used_at = NOW() WHERE id = $1")
            .bind(code_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Email verified for user {}", user_id);
        Ok(())
    }

    pub async fn get(&self, user_id: Uuid) -> ApiResult<User> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;
        user_from_row(&row)
    }

    pub async fn find_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn email_exists(&self, email: &str) -> ApiResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.db)
            .await?;
        Ok(exists)
    }

    pub async fn update_name(&self, user_id: Uuid, name: &str) -> ApiResult<User> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > 100 {
            return Err(ApiError::Validation("name: must be 1-100 characters".to_string()));
        }

        let row = sqlx::query(&format!(
            "UPDATE users SET name = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(name)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

        user_from_row(&row)
    }

    /// Change the password and revoke every outstanding refresh token
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> ApiResult<()> {
        if new_password.chars().count() < 6 {
            return Err(ApiError::Validation(
                "new_password: password must be at least 6 characters".to_string(),
            ));
        }

        let user = self.get(user_id).await?;
        if !self
            .verify_blocking(old_password.to_string(), user.password_hash)
            .await?
        {
            return Err(ApiError::BadRequest("current password is incorrect".to_string()));
        }

        let password_hash = self.hash_blocking(new_password.to_string()).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(&password_hash)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW()
             WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!("Password changed for user {}", user_id);
        Ok(())
    }

    /// Create or promote the configured bootstrap admin
    pub async fn ensure_admin(&self, email: &str, password: &str) -> ApiResult<User> {
        let email = normalize_email(email);

        if let Some(existing) = self.find_by_email(&email).await? {
            if existing.role == Role::Admin && existing.email_verified {
                return Ok(existing);
            }
            let row = sqlx::query(&format!(
                "UPDATE users SET role = 'admin', email_verified = TRUE, updated_at = NOW()
                 WHERE id = $1 RETURNING {}",
                USER_COLUMNS
            ))
            .bind(existing.id)
            .fetch_one(&self.db)
            .await?;
            info!("Promoted {} to admin", email);
            return user_from_row(&row);
        }

        let password_hash = self.hash_blocking(password.to_string()).await?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, name, role, email_verified, is_active)
            VALUES ($1, $2, $3, 'Administrator', 'admin', TRUE, TRUE)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&password_hash)
        .fetch_one(&self.db)
        .await?;

        info!("Created bootstrap admin {}", email);
        user_from_row(&row)
    }

    /// Oldest account, used as the identity when authentication is bypassed
    pub async fn first_user(&self) -> ApiResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users ORDER BY created_at ASC LIMIT 1",
            USER_COLUMNS
        ))
        .fetch_optional(&self.db)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Look up a Telegram-linked user, creating a verified account on first contact
    pub async fn find_or_create_telegram_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        promote_admin: bool,
    ) -> ApiResult<User> {
        let existing = sqlx::query(&format!(
            "SELECT {} FROM users WHERE telegram_id = $1",
            USER_COLUMNS
        ))
        .bind(telegram_id)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = existing {
            let user = user_from_row(&row)?;
            if promote_admin && user.role != Role::Admin {
                return self.set_role(user.id, Role::Admin).await;
            }
            return Ok(user);
        }

        // Telegram users never log in with a password
        let password_hash = self.hash_blocking(Uuid::new_v4().to_string()).await?;
        let role = if promote_admin { Role::Admin } else { Role::User };
        let name = username.unwrap_or("Telegram user");

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, name, role, email_verified, is_active,
                               telegram_id, telegram_username)
            VALUES ($1, $2, $3, $4, $5, TRUE, TRUE, $6, $7)
            ON CONFLICT (telegram_id) DO UPDATE SET telegram_username = EXCLUDED.telegram_username
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(telegram_email(telegram_id))
        .bind(&password_hash)
        .bind(name)
        .bind(role.as_str())
        .bind(telegram_id)
        .bind(username)
        .fetch_one(&self.db)
        .await?;

        let user = user_from_row(&row)?;
        info!("Linked Telegram account {} to user {}", telegram_id, user.id);
        Ok(user)
    }

    pub async fn set_active(&self, user_id: Uuid, is_active: bool) -> ApiResult<User> {
        let row = sqlx::query(&format!(
            "UPDATE users SET is_active = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(is_active)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

        if !is_active {
            sqlx::query(
                "UPDATE refresh_tokens SET revoked_at = NOW()
                 WHERE user_id = $1 AND revoked_at IS NULL",
            )
            .bind(user_id)
            .execute(&self.db)
            .await?;
        }

        user_from_row(&row)
    }

    pub async fn set_role(&self, user_id: Uuid, role: Role) -> ApiResult<User> {
        let row = sqlx::query(&format!(
            "UPDATE users SET role = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(role.as_str())
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

        user_from_row(&row)
    }

    pub async fn list_recent(&self, limit: i64) -> ApiResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC LIMIT $1",
            USER_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn count(&self) -> ApiResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM users")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Active users with a linked Telegram chat
    pub async fn telegram_recipients(&self) -> ApiResult<Vec<(Uuid, i64)>> {
        let rows = sqlx::query(
            "SELECT id, telegram_id FROM users WHERE telegram_id IS NOT NULL AND is_active = TRUE",
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> ApiResult<(Uuid, i64)> {
                Ok((row.try_get("id")?, row.try_get("telegram_id")?))
            })
            .collect()
    }

    /// Remove refresh tokens that can no longer be used
    pub async fn cleanup_expired_refresh_tokens(&self) -> ApiResult<u64> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens
             WHERE expires_at < NOW() OR revoked_at < NOW() - INTERVAL '7 days'",
        )
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn cleanup_expired_verification_codes(&self) -> ApiResult<u64> {
        let result = sqlx::query("DELETE FROM verification_codes WHERE expires_at < NOW()")
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn hash_blocking(&self, secret: String) -> ApiResult<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| ApiError::Internal(format!("Hashing task failed: {}", e)))?
    }

    async fn verify_blocking(&self, secret: String, stored_hash: String) -> ApiResult<bool> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&secret, &stored_hash))
            .await
            .map_err(|e| ApiError::Internal(format!("Verification task failed: {}", e)))
    }
}

pub(crate) fn user_from_row(row: &PgRow) -> ApiResult<User> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        name: row.try_get("name")?,
        role: Role::from_str(&role).unwrap_or(Role::User),
        email_verified: row.try_get("email_verified")?,
        is_active: row.try_get("is_active")?,
        telegram_id: row.try_get("telegram_id")?,
        telegram_username: row.try_get("telegram_username")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
