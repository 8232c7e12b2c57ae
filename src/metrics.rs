/// Prometheus metrics for the gateway
///
/// Each `AppContext` owns its own registry so that tests building several
/// contexts never collide on metric registration.
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Gateway completions by provider and outcome
    pub ai_requests: IntCounterVec,
    /// Tokens reported by upstream providers
    pub ai_tokens: IntCounterVec,
    /// Upstream latency in seconds
    pub ai_duration: HistogramVec,
    pub api_key_rejections: IntCounterVec,
    pub notifications_dropped: IntCounter,
    pub rate_limited: IntCounter,
    pub logins: IntCounterVec,
}

fn register_err(e: prometheus::Error) -> ApiError {
    ApiError::Internal(format!("Failed to register metric: {}", e))
}

impl Metrics {
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new();

        let ai_requests = IntCounterVec::new(
            Opts::new("ai_requests_total", "Total AI gateway requests"),
            &["provider", "outcome"],
        )
        .map_err(register_err)?;
        let ai_tokens = IntCounterVec::new(
            Opts::new("ai_tokens_total", "Tokens consumed through the AI gateway"),
            &["provider"],
        )
        .map_err(register_err)?;
        let ai_duration = HistogramVec::new(
            HistogramOpts::new("ai_request_duration_seconds", "Upstream provider latency")
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["provider"],
        )
        .map_err(register_err)?;
        let api_key_rejections = IntCounterVec::new(
            Opts::new("api_key_rejections_total", "Requests rejected by the API key gate"),
            &["reason"],
        )
        .map_err(register_err)?;
        let notifications_dropped = IntCounter::new(
            "notifications_dropped_total",
            "Notifications dropped because the delivery queue was full",
        )
        .map_err(register_err)?;
        let rate_limited = IntCounter::new(
            "rate_limited_requests_total",
            "Requests rejected by the rate limiter",
        )
        .map_err(register_err)?;
        let logins = IntCounterVec::new(
            Opts::new("logins_total", "Login attempts by outcome"),
            &["outcome"],
        )
        .map_err(register_err)?;

        registry.register(Box::new(ai_requests.clone())).map_err(register_err)?;
        registry.register(Box::new(ai_tokens.clone())).map_err(register_err)?;
        registry.register(Box::new(ai_duration.clone())).map_err(register_err)?;
        registry
            .register(Box::new(api_key_rejections.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(notifications_dropped.clone()))
            .map_err(register_err)?;
        registry.register(Box::new(rate_limited.clone())).map_err(register_err)?;
        registry.register(Box::new(logins.clone())).map_err(register_err)?;

        Ok(Self {
            registry,
            ai_requests,
            ai_tokens,
            ai_duration,
            api_key_rejections,
            notifications_dropped,
            rate_limited,
            logins,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather(&self) -> ApiResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| ApiError::Internal(format!("Metrics are not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.ai_requests.with_label_values(&["deepseek", "ok"]).inc();
        metrics.ai_tokens.with_label_values(&["deepseek"]).inc_by(42);
        metrics.rate_limited.inc();

        let text = metrics.gather().unwrap();
        assert!(text.contains("ai_requests_total{outcome=\"ok\",provider=\"deepseek\"} 1"));
        assert!(text.contains("ai_tokens_total{provider=\"deepseek\"} 42"));
        assert!(text.contains("rate_limited_requests_total 1"));
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.rate_limited.inc();
        assert!(b.gather().unwrap().contains("rate_limited_requests_total 0"));
    }
}
