/// Notification endpoints
use crate::{
    auth::AuthUser, context::AppContext, error::ApiResult, notifications::NotificationEvent,
};
use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::json;

/// Routes behind the JWT gate
pub fn routes() -> Router<AppContext> {
    Router::new().route("/api/notify/test", post(send_test))
}

#[derive(Deserialize, Default)]
struct TestRequest {
    #[serde(default)]
    message: Option<String>,
}

/// Send a test notification to the caller's own channels
async fn send_test(
    State(ctx): State<AppContext>,
    user: AuthUser,
    body: Option<Json<TestRequest>>,
) -> ApiResult<Json<serde_json::Value>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let message = req
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "Test notification from SaaSPro".to_string());

    ctx.notifier
        .notify(
            user.user_id,
            NotificationEvent::Other {
                kind: "test".to_string(),
                message,
            },
        )
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Notification queued",
    })))
}
