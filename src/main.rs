/// Clubhouse server entry point
use clubhouse::{
    config::{LoggingConfig, ServerConfig},
    error::AppResult,
    jobs, server, AppContext,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    init_tracing(&config.logging);

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Catch up on missed committee snapshots and arm the timer
    ctx.scheduler.schedule_next().await?;

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&logging.level)
        .unwrap_or_else(|_| "clubhouse=debug,tower_http=debug".into());

    if logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
