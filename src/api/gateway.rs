/// OpenAI-compatible AI gateway behind the API-key gate
///
/// Quota is checked by the gate before the call and incremented here after
/// it, so concurrent calls near the limit can overshoot it.
use crate::{
    ai::{completion_body, route_model, ChatRequest, UpstreamFailure, UsageEntry},
    api::extract::ApiJson,
    api_keys::ApiKeyRecord,
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use std::time::Instant;

/// Routes behind the API-key gate
pub fn routes() -> Router<AppContext> {
    Router::new().route("/api/v1/chat/completions", post(chat_completions))
}

async fn chat_completions(
    State(ctx): State<AppContext>,
    Extension(key): Extension<ApiKeyRecord>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> ApiResult<Response> {
    if request.model.trim().is_empty() {
        return Err(ApiError::Validation("model: is required".to_string()));
    }
    if request.messages.is_empty() {
        return Err(ApiError::Validation("messages: must not be empty".to_string()));
    }

    // Unlimited keys skip the plan allow-list
    if !key.is_unlimited() {
        let active = ctx
            .subscription_manager
            .active_plan_for_user(key.user_id)
            .await?
            .ok_or_else(|| {
                ApiError::Authorization("no active subscription or plan not found".to_string())
            })?;

        if !active.plan.allows_model(&request.model) {
            ctx.metrics
                .api_key_rejections
                .with_label_values(&["model_not_allowed"])
                .inc();
            return Err(ApiError::Authorization(
                "model not allowed by your subscription plan".to_string(),
            ));
        }
    }

    let route = route_model(&request.model)?;
    let endpoint = ctx.provider_router.endpoint(&route, &key.credentials)?;
    let provider = route.provider.name();

    let started = Instant::now();
    let result = ctx.provider_router.complete(&route, &endpoint, &request).await;
    let elapsed = started.elapsed();
    ctx.metrics
        .ai_duration
        .with_label_values(&[provider])
        .observe(elapsed.as_secs_f64());

    let mut entry = UsageEntry::new(key.user_id, Some(key.id), &request.model);
    entry.duration_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);

    let completion = match result {
        Ok(completion) => completion,
        Err(failure) => {
            tracing::error!("{} call for key {} failed: {}", provider, key.id, failure);
            ctx.metrics
                .ai_requests
                .with_label_values(&[provider, "error"])
                .inc();

            let response = match &failure {
                UpstreamFailure::Network(e) => {
                    entry.status_code = 500;
                    entry.error = Some(e.clone());
                    ApiError::Upstream("failed to call provider".to_string()).into_response()
                }
                UpstreamFailure::Status { status, body } => {
                    entry.status_code = *status;
                    entry.error = Some(failure.to_string());
                    let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                    (
                        status,
                        [(header::CONTENT_TYPE, "application/json")],
                        body.clone(),
                    )
                        .into_response()
                }
                UpstreamFailure::InvalidResponse(e) => {
                    entry.status_code = 500;
                    entry.error = Some(e.clone());
                    ApiError::Upstream("invalid response from provider".to_string())
                        .into_response()
                }
            };

            log_usage(&ctx, &entry).await;
            return Ok(response);
        }
    };

    entry.prompt_tokens = completion.prompt_tokens;
    entry.completion_tokens = completion.completion_tokens;
    entry.total_tokens = completion.total_tokens;
    log_usage(&ctx, &entry).await;

    ctx.metrics
        .ai_requests
        .with_label_values(&[provider, "ok"])
        .inc();
    if completion.total_tokens > 0 {
        ctx.metrics
            .ai_tokens
            .with_label_values(&[provider])
            .inc_by(completion.total_tokens.unsigned_abs());
    }

    if !key.is_unlimited() && completion.total_tokens > 0 {
        if let Err(e) = ctx
            .api_key_manager
            .increment_quota_used(key.id, completion.total_tokens)
            .await
        {
            tracing::error!(
                "Failed to charge {} tokens to key {}: {}",
                completion.total_tokens,
                key.id,
                e
            );
        }
    }

    Ok(Json(completion_body(&completion.content)).into_response())
}

/// Audit rows are best effort; the caller already has its answer
async fn log_usage(ctx: &AppContext, entry: &UsageEntry) {
    if let Err(e) = ctx.usage_manager.log_request(entry).await {
        tracing::warn!("Failed to log AI usage for user {}: {}", entry.user_id, e);
    }
}
