/// Background task implementations
use crate::{context::AppContext, db, error::ApiResult};
use std::sync::Arc;

pub async fn cleanup_expired_refresh_tokens(ctx: Arc<AppContext>) -> ApiResult<u64> {
    ctx.account_manager.cleanup_expired_refresh_tokens().await
}

pub async fn cleanup_expired_verification_codes(ctx: Arc<AppContext>) -> ApiResult<u64> {
    ctx.account_manager.cleanup_expired_verification_codes().await
}

pub async fn cleanup_expired_devices(ctx: Arc<AppContext>) -> ApiResult<u64> {
    ctx.twofa_manager.cleanup_expired_devices().await
}

/// Cancel subscriptions flagged for cancellation once their period ends
pub async fn expire_subscriptions(ctx: Arc<AppContext>) -> ApiResult<u64> {
    ctx.subscription_manager.expire_finished_periods().await
}

/// Drop limiter state for clients that have gone quiet
pub async fn compact_rate_limiter(ctx: Arc<AppContext>) -> ApiResult<u64> {
    ctx.rate_limiter.retain_recent();
    Ok(0)
}

/// Verify the database still answers
pub async fn health_check(ctx: Arc<AppContext>) -> ApiResult<u64> {
    db::test_connection(&ctx.db).await?;
    Ok(0)
}
