/// Telegram Mini App and bot bridge endpoints
use crate::{
    api::{auth::user_body, extract::ApiJson},
    api_keys::ProviderCredentials,
    context::AppContext,
    error::{ApiError, ApiResult},
    telegram::validate_init_data,
};
use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

/// Header the bot process authenticates with
pub const BOT_TOKEN_HEADER: &str = "x-bot-token";

/// Quota handed to keys minted for the bot
pub const BOT_KEY_QUOTA: i64 = 1_000_000;

const BOT_KEY_NAME: &str = "Telegram Bot Key";

/// Routes reachable without a session
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/webapp/auth", post(webapp_auth))
        .route("/api/telegram/ensure-key", post(ensure_key))
}

fn bot_token(ctx: &AppContext) -> ApiResult<&str> {
    ctx.config
        .telegram
        .bot_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Upstream("Telegram bot token not configured".to_string()))
}

fn is_admin_chat(ctx: &AppContext, telegram_id: i64) -> bool {
    ctx.config.telegram.admin_chat_id == Some(telegram_id)
}

#[derive(Deserialize)]
struct WebAppAuthRequest {
    #[serde(alias = "initData")]
    init_data: String,
}

async fn webapp_auth(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<WebAppAuthRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let token = bot_token(&ctx)?;
    let webapp_user = validate_init_data(&req.init_data, token, Utc::now().timestamp())?;

    let user = ctx
        .account_manager
        .find_or_create_telegram_user(
            webapp_user.id,
            webapp_user.username.as_deref(),
            is_admin_chat(&ctx, webapp_user.id),
        )
        .await?;
    if !user.is_active {
        return Err(ApiError::Authorization("account is disabled".to_string()));
    }

    let tokens = ctx.account_manager.issue_tokens(&user, false).await?;
    tracing::info!("WebApp login for Telegram user {}", webapp_user.id);

    Ok(Json(json!({
        "success": true,
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "token_type": tokens.token_type,
        "expires_in": tokens.expires_in,
        "user": user_body(&user),
    })))
}

#[derive(Deserialize)]
struct EnsureKeyRequest {
    telegram_id: i64,
    #[serde(default, alias = "telegram_name")]
    username: Option<String>,
}

/// Mint a gateway key for a Telegram user.
///
/// Only key hashes are stored, so every call produces a fresh key.
async fn ensure_key(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<EnsureKeyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let expected = bot_token(&ctx)?;
    let presented = headers
        .get(BOT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Authentication("bot token required".to_string()))?;
    if presented != expected {
        return Err(ApiError::Authentication("invalid bot token".to_string()));
    }

    let user = ctx
        .account_manager
        .find_or_create_telegram_user(
            req.telegram_id,
            req.username.as_deref(),
            is_admin_chat(&ctx, req.telegram_id),
        )
        .await?;

    let (raw_key, record) = ctx
        .api_key_manager
        .generate(user.id, BOT_KEY_NAME, ProviderCredentials::default(), BOT_KEY_QUOTA)
        .await?;
    tracing::info!("Issued bot key {} for Telegram user {}", record.id, req.telegram_id);

    Ok(Json(json!({ "token": raw_key })))
}
