/// Plans and subscriptions endpoints
use crate::{
    api::extract::ApiJson,
    auth::AuthUser,
    billing::Plan,
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Routes reachable without a session
pub fn public_routes() -> Router<AppContext> {
    Router::new().route("/api/plans", get(list_plans))
}

/// Routes behind the JWT gate
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/subscriptions", post(create_subscription))
        .route("/api/user/subscriptions", get(list_user_subscriptions))
}

async fn list_plans(State(ctx): State<AppContext>) -> ApiResult<Json<serde_json::Value>> {
    let plans = ctx.plan_manager.list_active().await?;
    Ok(Json(json!({ "plans": plans })))
}

#[derive(Deserialize)]
struct CreateSubscriptionRequest {
    plan_id: Uuid,
    #[serde(default = "default_period")]
    period_months: u32,
}

fn default_period() -> u32 {
    1
}

/// Amount charged for a period; yearly billing uses the yearly price
pub fn period_price(plan: &Plan, period_months: u32) -> f64 {
    if period_months == 12 {
        plan.price_yearly
    } else {
        plan.price_monthly * f64::from(period_months)
    }
}

async fn create_subscription(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<CreateSubscriptionRequest>,
) -> ApiResult<Response> {
    if req.period_months != 1 && req.period_months != 12 {
        return Err(ApiError::Validation(
            "period_months: must be 1 or 12".to_string(),
        ));
    }

    let plan = ctx.plan_manager.get(req.plan_id).await?;
    let subscription = ctx
        .subscription_manager
        .create(user.user_id, plan.id, req.period_months)
        .await?;

    let amount = period_price(&plan, req.period_months);
    match ctx.referral_manager.record_payment(user.user_id, amount).await {
        Ok(Some(commission)) => {
            tracing::info!(
                "Referral commission {:.2} credited for user {}",
                commission,
                user.user_id
            )
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to record referral payment for {}: {}", user.user_id, e),
    }

    let body = json!({
        "success": true,
        "subscription": subscription,
        "plan": plan.name,
        "amount": amount,
        "currency": plan.currency,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn list_user_subscriptions(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let subscriptions = ctx.subscription_manager.list_for_user(user.user_id).await?;
    Ok(Json(json!({ "subscriptions": subscriptions })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn plan(monthly: f64, yearly: f64) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "Pro".into(),
            code: "pro".into(),
            description: String::new(),
            price_monthly: monthly,
            price_yearly: yearly,
            currency: "RUB".into(),
            features: vec![],
            max_users: 1,
            ai_quota: 1000,
            ai_models: vec!["*".into()],
            is_active: true,
            sort_order: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_period_price() {
        let plan = plan(2990.0, 29900.0);
        assert_eq!(period_price(&plan, 1), 2990.0);
        assert_eq!(period_price(&plan, 12), 29900.0);
    }
}
