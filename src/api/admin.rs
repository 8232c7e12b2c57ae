/// Admin panel endpoints
///
/// Every route here sits behind the admin gate; handlers take `AdminUser`
/// so the acting admin shows up in the audit log.
use crate::{
    account::User,
    api::extract::ApiJson,
    api_keys::ApiKeyUpdate,
    auth::{AdminUser, Role},
    billing::{PlanInput, PlanUpdate},
    context::AppContext,
    error::{ApiError, ApiResult},
    notifications::NotificationEvent,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

const RECENT_USERS: i64 = 20;
const RECENT_SUBSCRIPTIONS: i64 = 50;

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/admin/stats", get(get_stats))
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/users/:id/block", put(set_blocked))
        .route("/api/admin/users/:id/role", put(set_role))
        .route("/api/admin/broadcast", post(broadcast))
        .route("/api/admin/api-keys", get(list_api_keys))
        .route(
            "/api/admin/api-keys/:id",
            put(update_api_key).delete(delete_api_key),
        )
        .route("/api/admin/ai-stats", get(ai_stats))
        .route("/api/admin/plans", get(list_plans).post(create_plan))
        .route("/api/admin/plans/:id", put(update_plan).delete(delete_plan))
        .route("/api/admin/subscriptions", get(list_subscriptions))
        .route("/api/admin/subscriptions/:id/cancel", put(cancel_subscription))
        .route(
            "/api/admin/subscriptions/:id/reactivate",
            put(reactivate_subscription),
        )
}

fn admin_user_body(user: &User) -> serde_json::Value {
    json!({
        "id": user.id,
        "email": user.email,
        "name": user.name,
        "role": user.role,
        "email_verified": user.email_verified,
        "is_active": user.is_active,
        "telegram_id": user.telegram_id,
        "telegram_username": user.telegram_username,
        "created_at": user.created_at,
    })
}

async fn get_stats(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
) -> ApiResult<Json<serde_json::Value>> {
    let (total_users, active_subscriptions, total_ai_requests, total_api_keys) = tokio::try_join!(
        ctx.account_manager.count(),
        ctx.subscription_manager.count_active(),
        ctx.usage_manager.total_requests(),
        ctx.api_key_manager.count(),
    )?;

    Ok(Json(json!({
        "total_users": total_users,
        "active_subscriptions": active_subscriptions,
        "total_ai_requests": total_ai_requests,
        "total_api_keys": total_api_keys,
    })))
}

async fn list_users(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
) -> ApiResult<Json<serde_json::Value>> {
    let users = ctx.account_manager.list_recent(RECENT_USERS).await?;
    let users: Vec<_> = users.iter().map(admin_user_body).collect();
    Ok(Json(json!({ "users": users })))
}

#[derive(Deserialize)]
struct BlockRequest {
    is_active: bool,
}

async fn set_blocked(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
    ApiJson(req): ApiJson<BlockRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if user_id == admin.user_id && !req.is_active {
        return Err(ApiError::BadRequest("cannot block yourself".to_string()));
    }

    let user = ctx.account_manager.set_active(user_id, req.is_active).await?;
    tracing::info!(
        "Admin {} set user {} active={}",
        admin.email,
        user_id,
        req.is_active
    );
    Ok(Json(json!({ "success": true, "user": admin_user_body(&user) })))
}

#[derive(Deserialize)]
struct RoleRequest {
    role: String,
}

async fn set_role(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
    ApiJson(req): ApiJson<RoleRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let role = Role::from_str(&req.role)?;
    let user = ctx.account_manager.set_role(user_id, role).await?;
    tracing::info!("Admin {} set role of {} to {}", admin.email, user_id, role.as_str());
    Ok(Json(json!({ "success": true, "user": admin_user_body(&user) })))
}

#[derive(Deserialize)]
struct BroadcastRequest {
    message: String,
}

/// Queue a message for every Telegram-linked user
async fn broadcast(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    ApiJson(req): ApiJson<BroadcastRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::Validation("message: is required".to_string()));
    }

    let recipients = ctx.account_manager.telegram_recipients().await?;
    let mut delivered = Vec::with_capacity(recipients.len());
    for (user_id, telegram_id) in recipients {
        let event = NotificationEvent::Other {
            kind: "broadcast".to_string(),
            message: message.to_string(),
        };
        match ctx.notifier.notify(user_id, event).await {
            Ok(()) => delivered.push(json!({ "user_id": user_id, "telegram_id": telegram_id })),
            Err(e) => tracing::warn!("Broadcast to {} failed: {}", user_id, e),
        }
    }

    tracing::info!("Admin {} broadcast to {} users", admin.email, delivered.len());
    Ok(Json(json!({
        "success": true,
        "sent": delivered.len(),
        "recipients": delivered,
    })))
}

async fn list_api_keys(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
) -> ApiResult<Json<serde_json::Value>> {
    let keys = ctx.api_key_manager.list_all().await?;
    Ok(Json(json!({ "keys": keys })))
}

async fn update_api_key(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(key_id): Path<Uuid>,
    ApiJson(update): ApiJson<ApiKeyUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = ctx.api_key_manager.update(key_id, update).await?;
    tracing::info!("Admin {} updated API key {}", admin.email, key_id);
    Ok(Json(json!({
        "success": true,
        "key": {
            "id": record.id,
            "user_id": record.user_id,
            "name": record.name,
            "quota_limit": record.quota_limit,
            "quota_used": record.quota_used,
            "is_active": record.is_active,
            "providers": record.credentials.providers(),
        },
    })))
}

async fn delete_api_key(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(key_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.api_key_manager.delete(key_id).await?;
    tracing::info!("Admin {} deleted API key {}", admin.email, key_id);
    Ok(Json(json!({ "success": true })))
}

async fn ai_stats(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
) -> ApiResult<Json<serde_json::Value>> {
    let models = ctx.usage_manager.model_stats().await?;
    Ok(Json(json!({ "models": models })))
}

async fn list_plans(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
) -> ApiResult<Json<serde_json::Value>> {
    let plans = ctx.plan_manager.list_all().await?;
    Ok(Json(json!({ "plans": plans })))
}

async fn create_plan(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    ApiJson(input): ApiJson<PlanInput>,
) -> ApiResult<Response> {
    let plan = ctx.plan_manager.create(input).await?;
    tracing::info!("Admin {} created plan {}", admin.email, plan.code);
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "plan": plan }))).into_response())
}

async fn update_plan(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(plan_id): Path<Uuid>,
    ApiJson(update): ApiJson<PlanUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    let plan = ctx.plan_manager.update(plan_id, update).await?;
    tracing::info!("Admin {} updated plan {}", admin.email, plan.code);
    Ok(Json(json!({ "success": true, "plan": plan })))
}

async fn delete_plan(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.plan_manager.delete(plan_id).await?;
    tracing::info!("Admin {} deleted plan {}", admin.email, plan_id);
    Ok(Json(json!({ "success": true })))
}

async fn list_subscriptions(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
) -> ApiResult<Json<serde_json::Value>> {
    let subscriptions = ctx.subscription_manager.list_all(RECENT_SUBSCRIPTIONS).await?;
    Ok(Json(json!({ "subscriptions": subscriptions })))
}

#[derive(Deserialize, Default)]
struct CancelRequest {
    #[serde(default)]
    immediate: bool,
}

async fn cancel_subscription(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(subscription_id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<Json<serde_json::Value>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    ctx.subscription_manager
        .cancel(subscription_id, req.immediate)
        .await?;
    tracing::info!(
        "Admin {} canceled subscription {} (immediate={})",
        admin.email,
        subscription_id,
        req.immediate
    );
    Ok(Json(json!({ "success": true, "immediate": req.immediate })))
}

async fn reactivate_subscription(
    State(ctx): State<AppContext>,
    AdminUser(admin): AdminUser,
    Path(subscription_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.subscription_manager.reactivate(subscription_id).await?;
    tracing::info!("Admin {} reactivated subscription {}", admin.email, subscription_id);
    Ok(Json(json!({ "success": true })))
}
