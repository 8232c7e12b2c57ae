/// Session-authenticated AI endpoints: assistant questions, image questions,
/// chat history and usage summaries
use crate::{
    ai::{route_model, ChatMessage, ChatRequest, UpstreamFailure, UsageEntry},
    api::extract::ApiJson,
    api_keys::ProviderCredentials,
    auth::AuthUser,
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

/// Model the assistant endpoint always uses
const ASSISTANT_MODEL: &str = "yandex/yandexgpt-lite";

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const ASSISTANT_PROMPT: &str = "You are the assistant of the SaaSPro subscription platform. \
Help users choose a plan, explain the differences between plans, answer billing questions \
and point to support when a question needs a human. Be concise, accurate and polite.";

/// Routes behind the JWT gate
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/ai/ask", post(ask))
        .route(
            "/api/ai/ask-with-file",
            post(ask_with_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/user/ai-usage", get(ai_usage))
        .route("/api/chat/save", post(save_message))
        .route("/api/chat/history", get(chat_history))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn ask(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<AskRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ApiError::Validation("question: is required".to_string()));
    }

    let active = if user.is_admin() {
        None
    } else {
        Some(
            ctx.subscription_manager
                .active_plan_for_user(user.user_id)
                .await?
                .ok_or_else(|| ApiError::Authorization("no active subscription".to_string()))?,
        )
    };

    if !ctx.provider_router.yandex_configured() {
        return Err(ApiError::Upstream(
            "YandexGPT API key not configured".to_string(),
        ));
    }

    if let Some(active) = &active {
        if active.ai_quota_exhausted() {
            return Err(ApiError::Authorization("AI quota exceeded".to_string()));
        }
    }

    let request = ChatRequest {
        model: ASSISTANT_MODEL.to_string(),
        messages: vec![
            ChatMessage::new("system", ASSISTANT_PROMPT),
            ChatMessage::new("user", question),
        ],
        stream: false,
        temperature: Some(0.7),
        max_tokens: Some(2000),
    };
    let route = route_model(&request.model)?;
    let endpoint = ctx
        .provider_router
        .endpoint(&route, &ProviderCredentials::default())?;

    let started = Instant::now();
    let result = ctx.provider_router.complete(&route, &endpoint, &request).await;

    let mut entry = UsageEntry::new(user.user_id, None, ASSISTANT_MODEL);
    entry.duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    let completion = match result {
        Ok(completion) => completion,
        Err(failure) => {
            tracing::error!("YandexGPT call for user {} failed: {}", user.user_id, failure);
            let (status, message) = match &failure {
                UpstreamFailure::Network(_) => (500, "failed to call YandexGPT"),
                UpstreamFailure::Status { status, .. } => (*status, "YandexGPT returned error"),
                UpstreamFailure::InvalidResponse(_) => (500, "invalid response from YandexGPT"),
            };
            entry.status_code = status;
            entry.error = Some(failure.to_string());
            if let Err(e) = ctx.usage_manager.log_request(&entry).await {
                tracing::warn!("Failed to log AI usage: {}", e);
            }
            return Err(ApiError::Upstream(message.to_string()));
        }
    };

    entry.prompt_tokens = completion.prompt_tokens;
    entry.completion_tokens = completion.completion_tokens;
    entry.total_tokens = completion.total_tokens;
    if let Err(e) = ctx.usage_manager.log_request(&entry).await {
        tracing::warn!("Failed to log AI usage: {}", e);
    }

    if let Some(active) = &active {
        if completion.total_tokens > 0 {
            ctx.subscription_manager
                .add_tokens_used(active.subscription_id, completion.total_tokens)
                .await?;
            tracing::debug!(
                "Charged {} tokens to subscription {}",
                completion.total_tokens,
                active.subscription_id
            );
        }
    }

    for (role, content) in [("user", question), ("assistant", completion.content.as_str())] {
        if let Err(e) = ctx.chat_history.save(user.user_id, role, content).await {
            tracing::warn!("Failed to store chat history for {}: {}", user.user_id, e);
        }
    }

    Ok(Json(json!({
        "answer": completion.content,
        "query": question,
    })))
}

/// `data:` URL for an uploaded file
pub fn data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, STANDARD.encode(bytes))
}

async fn ask_with_file(
    State(ctx): State<AppContext>,
    user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut question = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("question") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("question: {}", e)))?;
                question = Some(text);
            }
            Some("file") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("file: {}", e)))?;
                file = Some((content_type, bytes));
            }
            _ => {}
        }
    }

    let question = question
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("question: is required".to_string()))?;
    let (content_type, bytes) =
        file.ok_or_else(|| ApiError::Validation("file: is required".to_string()))?;

    tracing::info!(
        "Image question from user {} ({} bytes, {})",
        user.user_id,
        bytes.len(),
        content_type
    );

    let completion = ctx
        .provider_router
        .ask_with_image(question.trim(), &data_url(&content_type, &bytes))
        .await?;

    Ok(Json(json!({ "answer": completion.content })))
}

async fn ai_usage(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> ApiResult<Json<serde_json::Value>> {
    let totals = ctx.usage_manager.user_totals(user.user_id).await?;
    let by_model = ctx.usage_manager.user_by_model(user.user_id).await?;

    Ok(Json(json!({
        "total_tokens": totals.total_tokens,
        "total_requests": totals.total_requests,
        "by_model": by_model,
    })))
}

#[derive(Deserialize)]
struct SaveMessageRequest {
    role: String,
    content: String,
}

async fn save_message(
    State(ctx): State<AppContext>,
    user: AuthUser,
    ApiJson(req): ApiJson<SaveMessageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = ctx
        .chat_history
        .save(user.user_id, &req.role, &req.content)
        .await?;
    Ok(Json(json!({ "success": true, "id": id })))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

async fn chat_history(
    State(ctx): State<AppContext>,
    user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let history = ctx.chat_history.recent(user.user_id, query.limit).await?;
    Ok(Json(json!({ "history": history })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url() {
        assert_eq!(data_url("image/png", b"abc"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_assistant_model_routes_to_yandex() {
        let route = route_model(ASSISTANT_MODEL).unwrap();
        assert_eq!(route.provider, crate::ai::Provider::Yandex);
    }
}
