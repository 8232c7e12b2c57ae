/// API key management endpoints
use crate::{
    api::extract::ApiJson,
    api_keys::{ApiKeyRecord, ProviderCredentials, UNLIMITED},
    auth::AuthUser,
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Routes reachable without a session
pub fn public_routes() -> Router<AppContext> {
    Router::new().route("/api/keys/validate", post(validate_key))
}

/// Routes behind the JWT gate
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/keys/create", post(create_key))
        .route("/api/keys/revoke", post(revoke_key))
        .route("/api/user/keys", get(list_keys).post(create_key))
        .route("/api/user/keys/:id", delete(delete_key))
}

#[derive(Deserialize)]
struct CreateKeyRequest {
    name: String,
    #[serde(default, alias = "providers")]
    credentials: ProviderCredentials,
}

/// Quota a new key gets: admins are unlimited, everyone else inherits the plan quota
async fn quota_for(ctx: &AppContext, user: &AuthUser) -> ApiResult<i64> {
    if user.is_admin() {
        return Ok(UNLIMITED);
    }

    let active = ctx
        .subscription_manager
        .active_plan_for_user(user.user_id)
        .await?
        .ok_or_else(|| {
            ApiError::Authorization("active subscription required to create API keys".to_string())
        })?;

    if !active.plan.has_ai_access() {
        return Err(ApiError::Authorization(
            "your plan does not include AI access".to_string(),
        ));
    }

    Ok(active.plan.ai_quota)
}

fn key_summary(record: &ApiKeyRecord) -> serde_json::Value {
    json!({
        "id": record.id,
        "name": record.name,
        "quota_limit": record.quota_limit,
        "quota_used": record.quota_used,
        "is_active": record.is_active,
        "last_used_at": record.last_used_at,
        "created_at": record.created_at,
        "providers": record.credentials.providers(),
    })
}

async fn create_key(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<CreateKeyRequest>,
) -> ApiResult<Response> {
    let quota_limit = quota_for(&ctx, &user).await?;
    let (raw_key, record) = ctx
        .api_key_manager
        .generate(user.user_id, &req.name, req.credentials, quota_limit)
        .await?;

    let body = json!({
        "api_key": raw_key,
        "key_id": record.id,
        "name": record.name,
        "quota": record.quota_limit,
        "providers": record.credentials.providers(),
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn list_keys(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let keys = ctx.api_key_manager.list_for_user(user.user_id).await?;
    let keys: Vec<_> = keys.iter().map(key_summary).collect();
    Ok(Json(json!({ "keys": keys })))
}

#[derive(Deserialize)]
struct RevokeKeyRequest {
    key_id: Uuid,
}

async fn revoke_key(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<RevokeKeyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.api_key_manager.revoke(req.key_id, user.user_id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn delete_key(
    State(ctx): State<AppContext>,
    user: AuthUser,
    Path(key_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.api_key_manager.revoke(key_id, user.user_id).await?;
    Ok(Json(json!({ "message": "key revoked" })))
}

#[derive(Deserialize)]
struct ValidateKeyRequest {
    #[serde(alias = "key")]
    api_key: String,
}

async fn validate_key(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<ValidateKeyRequest>,
) -> ApiResult<Response> {
    let record = ctx.api_key_manager.verify(&req.api_key).await?;

    let Some(record) = record else {
        let body = json!({ "valid": false, "error": "invalid API key" });
        return Ok((StatusCode::UNAUTHORIZED, Json(body)).into_response());
    };

    Ok(Json(json!({
        "valid": true,
        "user_id": record.user_id,
        "quota": record.remaining(),
    }))
    .into_response())
}
