/// Profile endpoints for the signed-in user
use crate::{
    api::{auth::user_body, extract::ApiJson, middleware::client_ip},
    auth::AuthUser,
    context::AppContext,
    error::ApiResult,
    notifications::NotificationEvent,
};
use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

/// Routes behind the JWT gate
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/user/profile", get(get_profile).post(update_profile))
        .route("/api/user/password", post(change_password))
}

async fn get_profile(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let account = ctx.account_manager.get(user.user_id).await?;
    let active = ctx
        .subscription_manager
        .active_plan_for_user(user.user_id)
        .await?;

    let subscription = active.map(|active| {
        json!({
            "id": active.subscription_id,
            "plan": active.plan.name,
            "plan_code": active.plan.code,
            "ai_quota": active.plan.ai_quota,
            "ai_tokens_used": active.ai_tokens_used,
        })
    });

    Ok(Json(json!({
        "user": user_body(&account),
        "telegram_username": account.telegram_username,
        "created_at": account.created_at,
        "subscription": subscription,
    })))
}

#[derive(Deserialize)]
struct UpdateProfileRequest {
    name: String,
}

async fn update_profile(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let account = ctx.account_manager.update_name(user.user_id, &req.name).await?;
    Ok(Json(json!({
        "success": true,
        "user": user_body(&account),
    })))
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    old_password: String,
    new_password: String,
}

async fn change_password(
    State(ctx): State<AppContext>,
    user: AuthUser,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.account_manager
        .change_password(user.user_id, &req.old_password, &req.new_password)
        .await?;

    let event = NotificationEvent::PasswordChanged {
        ip: client_ip(&headers).unwrap_or_else(|| "unknown".to_string()),
    };
    if let Err(e) = ctx.notifier.notify(user.user_id, event).await {
        tracing::warn!("Failed to record password change for {}: {}", user.user_id, e);
    }

    Ok(Json(json!({
        "success": true,
        "message": "Password updated",
    })))
}
