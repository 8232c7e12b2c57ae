/// Two-factor authentication endpoints
use crate::{
    api::{
        extract::ApiJson,
        middleware::{client_ip, user_agent},
    },
    auth::AuthUser,
    context::AppContext,
    error::ApiResult,
    notifications::NotificationEvent,
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Routes behind the JWT gate
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/2fa/generate", post(generate))
        .route("/api/2fa/verify", post(verify))
        .route("/api/2fa/disable", post(disable))
        .route("/api/2fa/status", get(status))
        .route("/api/2fa/backup-codes", post(backup_codes))
        .route("/api/2fa/verify-backup", post(verify_backup))
        .route("/api/2fa/trust-device", post(trust_device))
        .route("/api/2fa/check-device", post(check_device))
        .route("/api/2fa/devices", get(list_devices))
        .route("/api/2fa/devices/:id", delete(revoke_device))
}

#[derive(Deserialize)]
struct CodeRequest {
    code: String,
}

/// Audit and deliver a security event; the action itself already succeeded
async fn notify(ctx: &AppContext, user: &AuthUser, event: NotificationEvent) {
    if let Err(e) = ctx.notifier.notify(user.user_id, event).await {
        tracing::warn!("Failed to record 2FA event for {}: {}", user.user_id, e);
    }
}

async fn generate(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let setup = ctx.twofa_manager.generate(user.user_id, &user.email).await?;
    Ok(Json(json!({
        "secret": setup.secret,
        "qr_url": setup.qr_url,
    })))
}

async fn verify(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<CodeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.twofa_manager
        .verify(user.user_id, &user.email, &req.code)
        .await?;
    notify(&ctx, &user, NotificationEvent::TwoFactorEnabled).await;
    Ok(Json(json!({ "success": true, "enabled": true })))
}

async fn disable(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<CodeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.twofa_manager
        .disable(user.user_id, &user.email, &req.code)
        .await?;
    notify(&ctx, &user, NotificationEvent::TwoFactorDisabled).await;
    Ok(Json(json!({ "success": true, "enabled": false })))
}

async fn status(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let status = ctx.twofa_manager.status(user.user_id).await?;
    Ok(Json(json!(status)))
}

async fn backup_codes(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let codes = ctx.twofa_manager.generate_backup_codes(user.user_id).await?;
    Ok(Json(json!({ "codes": codes })))
}

async fn verify_backup(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<CodeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.twofa_manager
        .verify_backup_code(user.user_id, &req.code)
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct TrustDeviceRequest {
    device_id: String,
    code: String,
}

async fn trust_device(
    State(ctx): State<AppContext>,
    user: AuthUser,
    headers: HeaderMap,
    ApiJson(req): ApiJson<TrustDeviceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.twofa_manager
        .check_enabled_code(user.user_id, &user.email, &req.code)
        .await?;

    let ip = client_ip(&headers).unwrap_or_else(|| "unknown".to_string());
    let device = ctx
        .twofa_manager
        .trust_device(user.user_id, &req.device_id, &user_agent(&headers), &ip)
        .await?;

    notify(
        &ctx,
        &user,
        NotificationEvent::DeviceTrusted {
            device: device.device_name.clone(),
        },
    )
    .await;

    Ok(Json(json!({ "success": true, "device": device })))
}

#[derive(Deserialize)]
struct CheckDeviceRequest {
    device_id: String,
}

async fn check_device(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<CheckDeviceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let trusted = ctx
        .twofa_manager
        .is_trusted(user.user_id, &req.device_id)
        .await?;
    Ok(Json(json!({ "trusted": trusted })))
}

async fn list_devices(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let devices = ctx.twofa_manager.list_devices(user.user_id).await?;
    Ok(Json(json!({ "devices": devices })))
}

async fn revoke_device(
    State(ctx): State<AppContext>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let device = ctx.twofa_manager.revoke_device(user.user_id, id).await?;
    notify(
        &ctx,
        &user,
        NotificationEvent::DeviceRevoked {
            device: device.device_name,
        },
    )
    .await;
    Ok(Json(json!({ "success": true })))
}
