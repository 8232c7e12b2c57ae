/// Per-user chat transcript
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const ALLOWED_ROLES: [&str; 3] = ["user", "assistant", "system"];

#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub id: i64,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct ChatHistoryManager {
    db: PgPool,
}

impl ChatHistoryManager {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn save(&self, user_id: Uuid, role: &str, content: &str) -> ApiResult<i64> {
        if !ALLOWED_ROLES.contains(&role) {
            return Err(ApiError::Validation(format!("role: unknown role '{}'", role)));
        }
        if content.trim().is_empty() {
            return Err(ApiError::Validation("content: must not be empty".to_string()));
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chat_history (user_id, role, content) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(user_id)
        .bind(role)
        .bind(content)
        .fetch_one(&self.db)
        .await?;

        Ok(id)
    }

    /// Most recent entries, returned oldest first
    pub async fn recent(&self, user_id: Uuid, limit: i64) -> ApiResult<Vec<ChatEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, role, content, created_at FROM (
                SELECT id, role, content, created_at
                FROM chat_history
                WHERE user_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> ApiResult<ChatEntry> {
                Ok(ChatEntry {
                    id: row.try_get("id")?,
                    role: row.try_get("role")?,
                    content: row.try_get("content")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
