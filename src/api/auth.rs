/// Account authentication endpoints
use crate::{
    account::{LoginContext, LoginOutcome, LoginRequest, RegisterRequest, User},
    api::{
        extract::ApiJson,
        middleware::{client_ip, user_agent},
    },
    context::AppContext,
    error::{ApiError, ApiResult},
    notifications::NotificationEvent,
    twofa::device_name,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/verify-email", post(verify_email))
        .route("/api/auth/resend-code", post(resend_code))
}

/// Public shape of a user in auth responses
pub fn user_body(user: &User) -> serde_json::Value {
    json!({
        "id": user.id,
        "email": user.email,
        "name": user.name,
        "role": user.role,
        "email_verified": user.email_verified,
    })
}

/// Issue an email verification code and mail it without holding the request
async fn send_verification(ctx: &AppContext, user: &User) -> ApiResult<()> {
    let code = ctx
        .account_manager
        .issue_verification_code(user.id, "email")
        .await?;

    let mailer = ctx.mailer.clone();
    let email = user.email.clone();
    tokio::spawn(async move {
        if let Err(e) = mailer.send_verification_code(&email, &code).await {
            tracing::warn!("Failed to send verification email to {}: {}", email, e);
        }
    });
    Ok(())
}

async fn register(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = ctx.account_manager.register(&req).await?;

    if let Some(code) = req.referral_code.as_deref().filter(|c| !c.trim().is_empty()) {
        if let Err(e) = ctx.referral_manager.attach_referral(code, user.id).await {
            tracing::warn!("Failed to attach referral {} for user {}: {}", code, user.id, e);
        }
    }

    if let Err(e) = send_verification(&ctx, &user).await {
        tracing::error!("Failed to issue verification code for {}: {}", user.id, e);
    }

    Ok(Json(json!({
        "success": true,
        "user": user_body(&user),
        "message": "Registration successful. Check your email for the verification code.",
    })))
}

async fn login(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Response> {
    let login_context = LoginContext {
        ip: client_ip(&headers).unwrap_or_else(|| "unknown".to_string()),
        user_agent: user_agent(&headers),
    };

    let outcome = match ctx.account_manager.login(&req, &login_context).await {
        Ok(outcome) => outcome,
        Err(e) => {
            ctx.metrics.logins.with_label_values(&["rejected"]).inc();
            return Err(e);
        }
    };

    let session = match outcome {
        LoginOutcome::Authenticated(session) => session,
        LoginOutcome::VerificationRequired { user_id } => {
            ctx.metrics.logins.with_label_values(&["unverified"]).inc();
            let body = json!({
                "error": "Email not verified",
                "requires_verification": true,
                "user_id": user_id,
            });
            return Ok((StatusCode::UNAUTHORIZED, Json(body)).into_response());
        }
    };
    ctx.metrics.logins.with_label_values(&["ok"]).inc();

    if session.new_ip {
        let ctx = ctx.clone();
        let user_id = session.user.id;
        let ip = login_context.ip.clone();
        let device = device_name(&login_context.user_agent);
        tokio::spawn(async move {
            let location = ctx.location.lookup(&ip).await;
            let event = NotificationEvent::NewDeviceLogin {
                ip,
                location,
                device,
            };
            if let Err(e) = ctx.notifier.notify(user_id, event).await {
                tracing::warn!("Failed to record new device login for {}: {}", user_id, e);
            }
        });
    }

    Ok(Json(json!({
        "success": true,
        "access_token": session.tokens.access_token,
        "refresh_token": session.tokens.refresh_token,
        "token_type": session.tokens.token_type,
        "expires_in": session.tokens.expires_in,
        "user": user_body(&session.user),
    }))
    .into_response())
}

#[derive(Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let (user, tokens) = ctx
        .account_manager
        .refresh(&req.refresh_token)
        .await
        .map_err(|e| match e {
            ApiError::Jwt(_) => ApiError::Authentication("Invalid refresh token".to_string()),
            other => other,
        })?;

    Ok(Json(json!({
        "success": true,
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "token_type": tokens.token_type,
        "expires_in": tokens.expires_in,
        "user": user_body(&user),
    })))
}

async fn logout(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.account_manager.logout(&req.refresh_token).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct VerifyEmailRequest {
    user_id: Uuid,
    code: String,
}

async fn verify_email(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<VerifyEmailRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.account_manager.verify_code(req.user_id, &req.code).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Email verified",
    })))
}

#[derive(Deserialize)]
struct ResendCodeRequest {
    user_id: Uuid,
}

async fn resend_code(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<ResendCodeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = ctx.account_manager.get(req.user_id).await?;
    if user.email_verified {
        return Err(ApiError::BadRequest("Email already verified".to_string()));
    }

    send_verification(&ctx, &user).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Verification code sent",
    })))
}
