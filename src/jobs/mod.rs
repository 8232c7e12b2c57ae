use crate::context::AppContext;
use std::{future::Future, sync::Arc};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

pub mod tasks;

const HOUR: Duration = Duration::from_secs(3600);

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        // Cleanup
        self.spawn_job("refresh token cleanup", HOUR, tasks::cleanup_expired_refresh_tokens);
        self.spawn_job(
            "verification code cleanup",
            Duration::from_secs(900),
            tasks::cleanup_expired_verification_codes,
        );
        self.spawn_job(
            "trusted device cleanup",
            Duration::from_secs(86400),
            tasks::cleanup_expired_devices,
        );
        self.spawn_job(
            "rate limiter compaction",
            Duration::from_secs(600),
            tasks::compact_rate_limiter,
        );

        // Billing
        self.spawn_job("subscription expiry", HOUR, tasks::expire_subscriptions);

        // Monitoring
        self.spawn_job("database health check", Duration::from_secs(300), tasks::health_check);

        info!("Background jobs started");
    }

    /// Run `task` every `period`; failures are logged and the loop keeps going
    fn spawn_job<F, Fut>(&self, name: &'static str, period: Duration, task: F)
    where
        F: Fn(Arc<AppContext>) -> Fut + Send + 'static,
        Fut: Future<Output = crate::error::ApiResult<u64>> + Send + 'static,
    {
        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                debug!("Running {}", name);

                match task(Arc::clone(&context)).await {
                    Ok(0) => {}
                    Ok(count) => info!("{}: {} rows affected", name, count),
                    Err(e) => error!("{} failed: {}", name, e),
                }
            }
        });
    }
}
