/// Referral program endpoints
use crate::{auth::AuthUser, context::AppContext, error::ApiResult};
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

/// Routes behind the JWT gate
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/referral/program", get(program))
        .route("/api/referral/stats", get(stats))
        .route("/api/referral/friends", get(friends))
}

async fn program(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let program = ctx.referral_manager.get_or_create_program(user.user_id).await?;
    Ok(Json(json!(program)))
}

async fn stats(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let stats = ctx.referral_manager.stats(user.user_id).await?;
    Ok(Json(json!(stats)))
}

async fn friends(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let friends = ctx.referral_manager.friends(user.user_id).await?;
    Ok(Json(json!({ "friends": friends })))
}
