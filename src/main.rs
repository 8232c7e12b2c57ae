/// SaaSPro gateway - subscription platform backend
use saaspro_gateway::{jobs, server, ApiResult, AppContext, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ApiResult<()> {
    // Load configuration first so the log format can follow it
    let config = ServerConfig::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "saaspro_gateway=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("SaaSPro gateway v{}", env!("CARGO_PKG_VERSION"));

    if config.auth.skip_auth {
        tracing::warn!("==========================================================");
        tracing::warn!("SKIP_AUTH is enabled: every request acts as the first admin");
        tracing::warn!("Never run with this flag outside local development");
        tracing::warn!("==========================================================");
    }

    // Create application context
    let ctx = AppContext::new(config).await?;

    if let (Some(email), Some(password)) = (
        ctx.config.auth.admin_email.clone(),
        ctx.config.auth.admin_password.clone(),
    ) {
        let admin = ctx.account_manager.ensure_admin(&email, &password).await?;
        tracing::info!("Admin account ready: {}", admin.email);
    }

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::new(ctx.clone())));
    scheduler.start();

    server::serve(ctx).await
}
