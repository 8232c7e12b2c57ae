/// Application context and dependency injection
use crate::{
    account::AccountManager,
    ai::{ChatHistoryManager, ProviderRouter, UsageManager},
    api_keys::ApiKeyManager,
    auth::{JwtKeys, SecretHasher},
    billing::{PlanManager, SubscriptionManager},
    config::ServerConfig,
    db,
    error::ApiResult,
    mailer::Mailer,
    metrics::Metrics,
    notifications::{
        dispatcher::DEFAULT_QUEUE_CAPACITY, DeliveryChannel, LocationLookup, Notifier,
        TelegramChannel,
    },
    rate_limit::RateLimiter,
    referral::ReferralManager,
    twofa::TwoFactorManager,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: PgPool,
    pub jwt: Arc<JwtKeys>,
    pub hasher: SecretHasher,
    // Domain managers
    pub account_manager: Arc<AccountManager>,
    pub api_key_manager: Arc<ApiKeyManager>,
    pub plan_manager: Arc<PlanManager>,
    pub subscription_manager: Arc<SubscriptionManager>,
    pub usage_manager: Arc<UsageManager>,
    pub chat_history: Arc<ChatHistoryManager>,
    pub twofa_manager: Arc<TwoFactorManager>,
    pub referral_manager: Arc<ReferralManager>,
    // Outbound
    pub provider_router: Arc<ProviderRouter>,
    pub notifier: Notifier,
    pub location: Arc<LocationLookup>,
    pub mailer: Arc<Mailer>,
    pub telegram: Option<Arc<TelegramChannel>>,
    // Rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> ApiResult<Self> {
        // Validate configuration
        config.validate()?;

        let pool = db::create_pool(&config.database, db::PoolOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        Self::for_pool(config, pool)
    }

    /// Build every service on top of an existing pool, without touching it.
    ///
    /// Spawns the notification worker, so it must run inside a tokio runtime.
    pub fn for_pool(config: ServerConfig, pool: PgPool) -> ApiResult<Self> {
        let jwt = Arc::new(JwtKeys::from_config(&config.auth));
        let hasher = SecretHasher::default();
        let metrics = Arc::new(Metrics::new()?);

        let provider_router = Arc::new(ProviderRouter::new(config.providers.clone())?);
        let mailer = Arc::new(Mailer::new(config.email.clone())?);
        let location = Arc::new(LocationLookup::new(&config.providers.ip_lookup_base_url));

        let telegram = config.telegram.bot_token.as_ref().map(|token| {
            Arc::new(TelegramChannel::new(
                provider_router.client(),
                &config.telegram.api_url,
                token,
            ))
        });
        if telegram.is_none() {
            tracing::info!("TELEGRAM_BOT_TOKEN not set, Telegram delivery disabled");
        }

        let mut channels: Vec<Arc<dyn DeliveryChannel>> = vec![mailer.clone()];
        if let Some(channel) = &telegram {
            channels.push(channel.clone());
        }
        let notifier = Notifier::start(pool.clone(), channels, DEFAULT_QUEUE_CAPACITY)
            .with_drop_counter(metrics.notifications_dropped.clone());

        Ok(Self {
            account_manager: Arc::new(AccountManager::new(
                pool.clone(),
                hasher.clone(),
                jwt.clone(),
            )),
            api_key_manager: Arc::new(ApiKeyManager::new(pool.clone(), hasher.clone())),
            plan_manager: Arc::new(PlanManager::new(pool.clone())),
            subscription_manager: Arc::new(SubscriptionManager::new(pool.clone())),
            usage_manager: Arc::new(UsageManager::new(pool.clone())),
            chat_history: Arc::new(ChatHistoryManager::new(pool.clone())),
            twofa_manager: Arc::new(TwoFactorManager::new(pool.clone(), hasher.clone())),
            referral_manager: Arc::new(ReferralManager::new(pool.clone())),
            rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            config: Arc::new(config),
            db: pool,
            jwt,
            hasher,
            provider_router,
            notifier,
            location,
            mailer,
            telegram,
            metrics,
        })
    }
}
