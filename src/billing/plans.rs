/// Subscription plan catalog
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;
use validator::Validate;

pub(crate) const PLAN_COLUMNS: &str = "p.id, p.name, p.code, p.description, p.price_monthly, \
     p.price_yearly, p.currency, p.features, p.max_users, p.ai_quota, p.ai_models, p.is_active, \
     p.sort_order, p.created_at";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub description: String,
    pub price_monthly: f64,
    pub price_yearly: f64,
    pub currency: String,
    pub features: Vec<String>,
    pub max_users: i32,
    /// Token allowance per period; 0 disables AI access, -1 is unlimited
    pub ai_quota: i64,
    /// Allowed models: `*`, exact names, or `family/` prefixes
    pub ai_models: Vec<String>,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Check a requested model against the plan's allow-list
    pub fn allows_model(&self, model: &str) -> bool {
        model_allowed(&self.ai_models, model)
    }

    pub fn has_ai_access(&self) -> bool {
        self.ai_quota != 0
    }
}

/// Allow-list match: `*`, exact name, or a family prefix (`openai/` or `openai`)
pub fn model_allowed(allowed: &[String], model: &str) -> bool {
    allowed.iter().any(|entry| {
        let entry = entry.trim();
        if entry.is_empty() {
            return false;
        }
        if entry == "*" || entry == model {
            return true;
        }
        if entry.ends_with('/') {
            return model.starts_with(entry);
        }
        model
            .strip_prefix(entry)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
    })
}

/// New plan (admin)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PlanInput {
    #[validate(length(min = 1, max = 100, message = "name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 50, message = "code is required"))]
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[validate(range(min = 0.0, message = "price must not be negative"))]
    #[serde(default)]
    pub price_monthly: f64,
    #[validate(range(min = 0.0, message = "price must not be negative"))]
    #[serde(default)]
    pub price_yearly: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[validate(range(min = 1, message = "max_users must be positive"))]
    #[serde(default = "default_max_users")]
    pub max_users: i32,
    #[serde(default)]
    pub ai_quota: i64,
    #[serde(default)]
    pub ai_models: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub sort_order: i32,
}

fn default_currency() -> String {
    "RUB".to_string()
}

fn default_max_users() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

/// Partial plan update (admin)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_monthly: Option<f64>,
    pub price_yearly: Option<f64>,
    pub currency: Option<String>,
    pub features: Option<Vec<String>>,
    pub max_users: Option<i32>,
    pub ai_quota: Option<i64>,
    pub ai_models: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i32>,
}

/// Plan manager
pub struct PlanManager {
    db: PgPool,
}

impl PlanManager {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Public catalog
    pub async fn list_active(&self) -> ApiResult<Vec<Plan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscription_plans p WHERE p.is_active = TRUE
             ORDER BY p.sort_order, p.price_monthly",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(plan_from_row).collect()
    }

    pub async fn list_all(&self) -> ApiResult<Vec<Plan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscription_plans p ORDER BY p.sort_order, p.created_at",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(plan_from_row).collect()
    }

    pub async fn get(&self, plan_id: Uuid) -> ApiResult<Plan> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscription_plans p WHERE p.id = $1",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("plan not found".to_string()))?;

        plan_from_row(&row)
    }

    pub async fn create(&self, input: PlanInput) -> ApiResult<Plan> {
        input.validate()?;
        if input.ai_quota < -1 {
            return Err(ApiError::Validation("ai_quota must be -1 or non-negative".to_string()));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM subscription_plans WHERE code = $1)")
                .bind(&input.code)
                .fetch_one(&self.db)
                .await?;
        if exists {
            return Err(ApiError::Conflict(format!("plan code {} already exists", input.code)));
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO subscription_plans
                (id, name, code, description, price_monthly, price_yearly, currency, features,
                 max_users, ai_quota, ai_models, is_active, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.code)
        .bind(&input.description)
        .bind(input.price_monthly)
        .bind(input.price_yearly)
        .bind(&input.currency)
        .bind(serde_json::json!(input.features))
        .bind(input.max_users)
        .bind(input.ai_quota)
        .bind(serde_json::json!(input.ai_models))
        .bind(input.is_active)
        .bind(input.sort_order)
        .execute(&self.db)
        .await?;

        tracing::info!("Created plan {} ({})", input.code, id);
        self.get(id).await
    }

    pub async fn update(&self, plan_id: Uuid, update: PlanUpdate) -> ApiResult<Plan> {
        if matches!(update.ai_quota, Some(q) if q < -1) {
            return Err(ApiError::Validation("ai_quota must be -1 or non-negative".to_string()));
        }

        let result = sqlx::query(
            r#"
            UPDATE subscription_plans
            SET name = COALESCE($1, name),
                description = COALESCE($2, description),
                price_monthly = COALESCE($3, price_monthly),
                price_yearly = COALESCE($4, price_yearly),
                currency = COALESCE($5, currency),
                features = COALESCE($6, features),
                max_users = COALESCE($7, max_users),
                ai_quota = COALESCE($8, ai_quota),
                ai_models = COALESCE($9, ai_models),
                is_active = COALESCE($10, is_active),
                sort_order = COALESCE($11, sort_order),
                updated_at = NOW()
            WHERE id = $12
            "#,
        )
        .bind(update.name)
        .bind(update.description)
        .bind(update.price_monthly)
        .bind(update.price_yearly)
        .bind(update.currency)
        .bind(update.features.map(|f| serde_json::json!(f)))
        .bind(update.max_users)
        .bind(update.ai_quota)
        .bind(update.ai_models.map(|m| serde_json::json!(m)))
        .bind(update.is_active)
        .bind(update.sort_order)
        .bind(plan_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("plan not found".to_string()));
        }

        self.get(plan_id).await
    }

    /// Delete a plan that has no active subscriptions
    pub async fn delete(&self, plan_id: Uuid) -> ApiResult<()> {
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_subscriptions WHERE plan_id = $1 AND status = 'active'",
        )
        .bind(plan_id)
        .fetch_one(&self.db)
        .await?;

        if active > 0 {
            return Err(ApiError::Conflict(
                "cannot delete plan with active subscriptions".to_string(),
            ));
        }

        let result = sqlx::query("DELETE FROM subscription_plans WHERE id = $1")
            .bind(plan_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("plan not found".to_string()));
        }
        Ok(())
    }
}

fn string_list(value: serde_json::Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}

pub(crate) fn plan_from_row(row: &PgRow) -> ApiResult<Plan> {
    Ok(Plan {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        description: row.try_get("description")?,
        price_monthly: row.try_get("price_monthly")?,
        price_yearly: row.try_get("price_yearly")?,
        currency: row.try_get("currency")?,
        features: string_list(row.try_get("features")?),
        max_users: row.try_get("max_users")?,
        ai_quota: row.try_get("ai_quota")?,
        ai_models: string_list(row.try_get("ai_models")?),
        is_active: row.try_get("is_active")?,
        sort_order: row.try_get("sort_order")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(models: &[&str]) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            code: "test".to_string(),
            description: String::new(),
            price_monthly: 0.0,
            price_yearly: 0.0,
            currency: "RUB".to_string(),
            features: vec![],
            max_users: 1,
            ai_quota: 1000,
            ai_models: models.iter().map(|m| m.to_string()).collect(),
            is_active: true,
            sort_order: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_family_prefix() {
        let plan = plan_with(&["openai/"]);
        assert!(plan.allows_model("openai/gpt-4"));
        assert!(!plan.allows_model("anthropic/claude"));
        assert!(!plan.allows_model("openai-fake"));
    }

    #[test]
    fn test_wildcard() {
        let plan = plan_with(&["*"]);
        assert!(plan.allows_model("openai/gpt-4"));
        assert!(plan.allows_model("anything at all"));
    }

    #[test]
    fn test_exact_and_bare_family() {
        let plan = plan_with(&["deepseek-chat", "yandex"]);
        assert!(plan.allows_model("deepseek-chat"));
        assert!(!plan.allows_model("deepseek-reasoner"));
        assert!(plan.allows_model("yandex/yandexgpt-lite"));
        assert!(!plan.allows_model("yandexgpt"));
    }

    #[test]
    fn test_empty_list_denies() {
        let plan = plan_with(&[]);
        assert!(!plan.allows_model("openai/gpt-4"));
    }

    #[test]
    fn test_ai_access() {
        let mut plan = plan_with(&["*"]);
        assert!(plan.has_ai_access());
        plan.ai_quota = 0;
        assert!(!plan.has_ai_access());
        plan.ai_quota = -1;
        assert!(plan.has_ai_access());
    }

    #[test]
    fn test_plan_input_validation() {
        let input: PlanInput = serde_json::from_value(serde_json::json!({
            "name": "Pro",
            "code": "pro",
            "price_monthly": -5.0
        }))
        .unwrap();
        assert!(input.validate().is_err());

        let input: PlanInput = serde_json::from_value(serde_json::json!({
            "name": "Pro",
            "code": "pro",
            "ai_models": ["*"],
            "ai_quota": -1
        }))
        .unwrap();
        assert!(input.validate().is_ok());
        assert_eq!(input.currency, "RUB");
        assert!(input.is_active);
    }
}
