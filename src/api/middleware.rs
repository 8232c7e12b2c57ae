/// Authentication and authorization middleware
///
/// Three gates: the JWT request gate, the admin gate that composes after it,
/// and the API-key gate in front of the `/api/v1` gateway group.
use crate::{
    api_keys::{ApiKeyRecord, QuotaPolicy},
    auth::{AuthUser, Role},
    context::AppContext,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Like `extract_bearer_token`, but tells a missing header from a malformed one
pub fn parse_bearer(headers: &HeaderMap) -> ApiResult<String> {
    if headers.get(header::AUTHORIZATION).is_none() {
        return Err(ApiError::Authentication(
            "authorization header required".to_string(),
        ));
    }

    extract_bearer_token(headers).ok_or_else(|| {
        ApiError::Authentication("invalid authorization header format".to_string())
    })
}

/// Client IP from proxy headers
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Resolve the caller behind a request.
///
/// With `SKIP_AUTH` on, every request acts as the first user with the admin
/// role. That path exists for local development only and is refused by
/// config validation in production.
pub async fn resolve_auth_user(ctx: &AppContext, headers: &HeaderMap) -> ApiResult<AuthUser> {
    if ctx.config.auth.skip_auth {
        let user = ctx
            .account_manager
            .first_user()
            .await?
            .ok_or_else(|| ApiError::Authentication("no users available".to_string()))?;
        return Ok(AuthUser {
            user_id: user.id,
            email: user.email,
            role: Role::Admin,
        });
    }

    let token = parse_bearer(headers)?;
    let claims = ctx.jwt.validate_access_token(&token).map_err(|e| {
        tracing::debug!("Access token rejected: {}", e);
        ApiError::Authentication("invalid or expired access token".to_string())
    })?;

    Ok(AuthUser::from(claims))
}

/// JWT request gate - injects `AuthUser` into request extensions
pub async fn require_jwt(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = resolve_auth_user(&ctx, req.headers()).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Admin gate - composes after `require_jwt`
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ApiError::Authentication("authentication required".to_string()))?;

    if !user.is_admin() {
        tracing::warn!("User {} attempted an admin action", user.user_id);
        return Err(ApiError::Authorization("admin access required".to_string()));
    }

    Ok(next.run(req).await)
}

/// Gateway gate - raw API key as the bearer credential, quota checked up front
pub async fn require_api_key(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let raw_key = parse_bearer(req.headers())?;
    let record = admit_api_key(&ctx, &raw_key).await?;
    req.extensions_mut().insert(record);
    Ok(next.run(req).await)
}

async fn admit_api_key(ctx: &AppContext, raw_key: &str) -> ApiResult<ApiKeyRecord> {
    let record = ctx
        .api_key_manager
        .verify(raw_key)
        .await?
        .ok_or_else(|| {
            ctx.metrics
                .api_key_rejections
                .with_label_values(&["invalid_key"])
                .inc();
            ApiError::Authentication("invalid API key".to_string())
        })?;

    if let Err(e) = QuotaPolicy::admit(record.quota_limit, record.quota_used) {
        ctx.metrics
            .api_key_rejections
            .with_label_values(&["quota_exceeded"])
            .inc();
        tracing::info!(
            "API key {} rejected: quota {}/{}",
            record.id,
            record.quota_used,
            record.quota_limit
        );
        return Err(e);
    }

    Ok(record)
}
