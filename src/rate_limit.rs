/// Rate Limiting System
///
/// One keyed governor limiter, N requests per minute per client key. State is
/// in-process only.
use crate::{
    api::middleware::client_ip,
    config::RateLimitConfig,
    context::AppContext,
    error::ApiError,
};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type KeyedLimiter = GovernorLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<KeyedLimiter>,
    per_minute: NonZeroU32,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(GovernorLimiter::keyed(Quota::per_minute(per_minute))),
            per_minute,
            enabled: config.enabled,
        }
    }

    pub fn limit(&self) -> u32 {
        self.per_minute.get()
    }

    /// Admit one request for `key`
    pub fn check(&self, key: &str) -> Result<(), ApiError> {
        if !self.enabled {
            return Ok(());
        }
        self.limiter.check_key(&key.to_string()).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            ApiError::RateLimitExceeded {
                retry_after: wait.max(Duration::from_secs(1)),
            }
        })
    }

    /// Drop state for keys that have fully replenished
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }
}

/// Client key: the client IP. Credentials are not authenticated yet at this
/// layer, so they never pick the bucket.
pub fn client_key(headers: &HeaderMap) -> String {
    match client_ip(headers) {
        Some(ip) => format!("ip:{}", ip),
        None => "anonymous".to_string(),
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(request.headers());

    if let Err(e) = ctx.rate_limiter.check(&key) {
        tracing::debug!("Rate limit hit for {}", key);
        ctx.metrics.rate_limited.inc();
        return e.into_response();
    }

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.rate_limiter.limit().to_string()) {
        response.headers_mut().insert("X-RateLimit-Limit", value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(per_minute: u32, enabled: bool) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled,
            requests_per_minute: per_minute,
        })
    }

    #[test]
    fn test_limit_per_key() {
        let limiter = limiter(3, true);
        for _ in 0..3 {
            assert!(limiter.check("ip:1.1.1.1").is_ok());
        }
        let err = limiter.check("ip:1.1.1.1").unwrap_err();
        assert!(matches!(
            err,
            ApiError::RateLimitExceeded { retry_after } if retry_after >= Duration::from_secs(1)
        ));

        // Other clients are unaffected
        assert!(limiter.check("ip:2.2.2.2").is_ok());
    }

    #[test]
    fn test_disabled_limiter_admits_everything() {
        let limiter = limiter(1, false);
        for _ in 0..10 {
            assert!(limiter.check("anonymous").is_ok());
        }
    }

    #[test]
    fn test_client_key_selection() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), "anonymous");

        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_key(&headers), "ip:203.0.113.9");

        headers.insert("authorization", "Bearer sk-saaspro-abc".parse().unwrap());
        assert_eq!(client_key(&headers), "ip:203.0.113.9");
    }

    #[test]
    fn test_rotating_bearer_shares_the_ip_bucket() {
        let limiter = limiter(2, true);
        let mut rejected = 0;
        for i in 0..20 {
            let mut headers = HeaderMap::new();
            headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());
            headers.insert("authorization", format!("Bearer junk{}", i).parse().unwrap());
            if limiter.check(&client_key(&headers)).is_err() {
                rejected += 1;
            }
        }
        assert_eq!(rejected, 18);
    }
}
