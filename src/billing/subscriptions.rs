/// User subscriptions
///
/// Nothing in the schema prevents a user from holding several active
/// subscriptions; lookups pick the most recently created one.
use super::plans::{plan_from_row, Plan, PLAN_COLUMNS};
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub ai_tokens_used: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionWithPlan {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub plan_name: String,
    pub plan_code: String,
    pub price_monthly: f64,
    pub currency: String,
}

/// The plan behind a user's current subscription
#[derive(Debug, Clone)]
pub struct ActivePlan {
    pub subscription_id: Uuid,
    pub plan: Plan,
    pub ai_tokens_used: i64,
}

impl ActivePlan {
    /// Whether the period's token allowance is spent
    pub fn ai_quota_exhausted(&self) -> bool {
        self.plan.ai_quota != -1 && self.ai_tokens_used >= self.plan.ai_quota
    }
}

/// End of a billing period starting at `start`; only monthly and yearly periods exist
pub fn period_end(start: DateTime<Utc>, period_months: u32) -> ApiResult<DateTime<Utc>> {
    if period_months != 1 && period_months != 12 {
        return Err(ApiError::Validation(
            "period_months: must be 1 or 12".to_string(),
        ));
    }
    start
        .checked_add_months(Months::new(period_months))
        .ok_or_else(|| ApiError::Internal("billing period overflow".to_string()))
}

const SUBSCRIPTION_COLUMNS: &str = "s.id, s.user_id, s.plan_id, s.status, s.current_period_start, \
     s.current_period_end, s.cancel_at_period_end, s.ai_tokens_used, s.created_at";

fn subscription_from_row(row: &sqlx::postgres::PgRow) -> ApiResult<Subscription> {
    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        plan_id: row.try_get("plan_id")?,
        status: row.try_get("status")?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        ai_tokens_used: row.try_get("ai_tokens_used")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Subscription manager
pub struct SubscriptionManager {
    db: PgPool,
}

impl SubscriptionManager {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        period_months: u32,
    ) -> ApiResult<Subscription> {
        let start = Utc::now();
        let end = period_end(start, period_months)?;

        let plan_active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM subscription_plans WHERE id = $1")
                .bind(plan_id)
                .fetch_optional(&self.db)
                .await?;
        match plan_active {
            Some(true) => {}
            _ => return Err(ApiError::NotFound("plan not found".to_string())),
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO user_subscriptions AS s
                (id, user_id, plan_id, status, current_period_start, current_period_end)
            VALUES ($1, $2, $3, 'active', $4, $5)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(plan_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.db)
        .await?;

        let subscription = subscription_from_row(&row)?;
        tracing::info!(
            "User {} subscribed to plan {} until {}",
            user_id,
            plan_id,
            subscription.current_period_end
        );
        Ok(subscription)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> ApiResult<Vec<SubscriptionWithPlan>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, p.name AS plan_name, p.code AS plan_code, p.price_monthly, p.currency
            FROM user_subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.user_id = $1
            ORDER BY s.created_at DESC
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> ApiResult<SubscriptionWithPlan> {
                Ok(SubscriptionWithPlan {
                    subscription: subscription_from_row(row)?,
                    plan_name: row.try_get("plan_name")?,
                    plan_code: row.try_get("plan_code")?,
                    price_monthly: row.try_get("price_monthly")?,
                    currency: row.try_get("currency")?,
                })
            })
            .collect()
    }

    /// Current plan: active status, inside its period, newest first
    pub async fn active_plan_for_user(&self, user_id: Uuid) -> ApiResult<Option<ActivePlan>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT s.id AS subscription_id, s.ai_tokens_used, {}
            FROM user_subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.user_id = $1
              AND s.status = 'active'
              AND s.current_period_start <= NOW()
              AND s.current_period_end > NOW()
            ORDER BY s.created_at DESC
            LIMIT 1
            "#,
            PLAN_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(Some(ActivePlan {
                subscription_id: row.try_get("subscription_id")?,
                ai_tokens_used: row.try_get("ai_tokens_used")?,
                plan: plan_from_row(&row)?,
            })),
            None => Ok(None),
        }
    }

    pub async fn add_tokens_used(&self, subscription_id: Uuid, tokens: i64) -> ApiResult<()> {
        sqlx::query(
            "UPDATE user_subscriptions SET ai_tokens_used = ai_tokens_used + $1, updated_at = NOW()
             WHERE id = $2",
        )
        .bind(tokens)
        .bind(subscription_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Cancel now, or flag for cancellation at the end of the period
    pub async fn cancel(&self, subscription_id: Uuid, immediate: bool) -> ApiResult<()> {
        let query = if immediate {
            "UPDATE user_subscriptions SET status = 'canceled', updated_at = NOW() WHERE id = $1"
        } else {
            "UPDATE user_subscriptions SET cancel_at_period_end = TRUE, updated_at = NOW()
             WHERE id = $1"
        };

        let result = sqlx::query(query).bind(subscription_id).execute(&self.db).await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("subscription not found".to_string()));
        }
        Ok(())
    }

    /// Undo a pending end-of-period cancellation
    pub async fn reactivate(&self, subscription_id: Uuid) -> ApiResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET cancel_at_period_end = FALSE, updated_at = NOW()
            WHERE id = $1 AND cancel_at_period_end = TRUE AND status = 'active'
            "#,
        )
        .bind(subscription_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(
                "no pending cancellation for this subscription".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn list_all(&self, limit: i64) -> ApiResult<Vec<SubscriptionWithPlan>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, p.name AS plan_name, p.code AS plan_code, p.price_monthly, p.currency
            FROM user_subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            ORDER BY s.created_at DESC
            LIMIT $1
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> ApiResult<SubscriptionWithPlan> {
                Ok(SubscriptionWithPlan {
                    subscription: subscription_from_row(row)?,
                    plan_name: row.try_get("plan_name")?,
                    plan_code: row.try_get("plan_code")?,
                    price_monthly: row.try_get("price_monthly")?,
                    currency: row.try_get("currency")?,
                })
            })
            .collect()
    }

    pub async fn count_active(&self) -> ApiResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::BIGINT FROM user_subscriptions
             WHERE status = 'active' AND current_period_end > NOW()",
        )
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    /// End subscriptions whose period is over and that were flagged for cancellation
    pub async fn expire_finished_periods(&self) -> ApiResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE user_subscriptions
            SET status = 'canceled', updated_at = NOW()
            WHERE status = 'active' AND cancel_at_period_end = TRUE AND current_period_end <= NOW()
            "#,
        )
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn plan(ai_quota: i64) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "Basic".to_string(),
            code: "basic".to_string(),
            description: String::new(),
            price_monthly: 490.0,
            price_yearly: 4900.0,
            currency: "RUB".to_string(),
            features: vec![],
            max_users: 1,
            ai_quota,
            ai_models: vec!["*".to_string()],
            is_active: true,
            sort_order: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_period_end() {
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap();
        let monthly = period_end(start, 1).unwrap();
        assert_eq!(monthly, Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap());

        let yearly = period_end(start, 12).unwrap();
        assert_eq!(yearly, Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap());

        assert!(period_end(start, 6).is_err());
        assert!(period_end(start, 0).is_err());
    }

    #[test]
    fn test_quota_exhaustion() {
        let mut active = ActivePlan {
            subscription_id: Uuid::new_v4(),
            plan: plan(1000),
            ai_tokens_used: 999,
        };
        assert!(!active.ai_quota_exhausted());
        active.ai_tokens_used = 1000;
        assert!(active.ai_quota_exhausted());

        active.plan.ai_quota = -1;
        assert!(!active.ai_quota_exhausted());
    }
}
