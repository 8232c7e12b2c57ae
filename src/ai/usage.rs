/// AI usage log and per-model aggregates
use crate::error::ApiResult;
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// One upstream call, successful or not
#[derive(Debug, Clone)]
pub struct UsageEntry {
    pub api_key_id: Option<Uuid>,
    pub user_id: Uuid,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub duration_ms: i64,
    pub status_code: u16,
    pub error: Option<String>,
}

impl UsageEntry {
    pub fn new(user_id: Uuid, api_key_id: Option<Uuid>, model: &str) -> Self {
        Self {
            api_key_id,
            user_id,
            model: model.to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            duration_ms: 0,
            status_code: 200,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub total_tokens: i64,
    pub total_requests: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelUsage {
    pub model: String,
    pub requests: i64,
    pub tokens: i64,
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(0, i32::MAX as i64) as i32
}

pub struct UsageManager {
    db: PgPool,
}

impl UsageManager {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn log_request(&self, entry: &UsageEntry) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_usage_logs
                (id, api_key_id, user_id, model, prompt_tokens, completion_tokens,
                 total_tokens, duration_ms, status_code, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.api_key_id)
        .bind(entry.user_id)
        .bind(&entry.model)
        .bind(clamp_i32(entry.prompt_tokens))
        .bind(clamp_i32(entry.completion_tokens))
        .bind(clamp_i32(entry.total_tokens))
        .bind(clamp_i32(entry.duration_ms))
        .bind(entry.status_code as i32)
        .bind(&entry.error)
        .execute(&self.db)
        .await?;

        tracing::debug!(
            "Logged {} call for user {}: {} tokens, status {}",
            entry.model,
            entry.user_id,
            entry.total_tokens,
            entry.status_code
        );

        Ok(())
    }

    pub async fn user_totals(&self, user_id: Uuid) -> ApiResult<UsageTotals> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(total_tokens), 0)::BIGINT AS total_tokens,
                   COUNT(*)::BIGINT AS total_requests
            FROM ai_usage_logs
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(UsageTotals {
            total_tokens: row.try_get("total_tokens")?,
            total_requests: row.try_get("total_requests")?,
        })
    }

    pub async fn user_by_model(&self, user_id: Uuid) -> ApiResult<Vec<ModelUsage>> {
        let rows = sqlx::query(
            r#"
            SELECT model, COUNT(*)::BIGINT AS requests,
                   COALESCE(SUM(total_tokens), 0)::BIGINT AS tokens
            FROM ai_usage_logs
            WHERE user_id = $1
            GROUP BY model
            ORDER BY tokens DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(model_usage_from_row).collect()
    }

    /// Per-model totals across every user
    pub async fn model_stats(&self) -> ApiResult<Vec<ModelUsage>> {
        let rows = sqlx::query(
            r#"
            SELECT model, COUNT(*)::BIGINT AS requests,
                   COALESCE(SUM(total_tokens), 0)::BIGINT AS tokens
            FROM ai_usage_logs
            GROUP BY model
            ORDER BY requests DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(model_usage_from_row).collect()
    }

    pub async fn total_requests(&self) -> ApiResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM ai_usage_logs")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}

fn model_usage_from_row(row: &sqlx::postgres::PgRow) -> ApiResult<ModelUsage> {
    Ok(ModelUsage {
        model: row.try_get("model")?,
        requests: row.try_get("requests")?,
        tokens: row.try_get("tokens")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_defaults() {
        let user = Uuid::new_v4();
        let entry = UsageEntry::new(user, None, "ollama/llama3");
        assert_eq!(entry.status_code, 200);
        assert_eq!(entry.total_tokens, 0);
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_clamp_i32() {
        assert_eq!(clamp_i32(-5), 0);
        assert_eq!(clamp_i32(42), 42);
        assert_eq!(clamp_i32(i64::MAX), i32::MAX);
    }
}
