use crate::committee::scheduler::next_fallback_boundary;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        // Spawn cleanup tasks
        tokio::spawn(Self::expired_session_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::stale_attempt_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::rate_limiter_cleanup_job(Arc::clone(&self)));

        // Safety net next to the self-rescheduling snapshot timer
        if self.context.config.committee.snapshot_fallback_enabled {
            tokio::spawn(Self::snapshot_fallback_job(Arc::clone(&self)));
        }

        // Spawn monitoring tasks
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Cleanup expired sessions (runs every hour)
    async fn expired_session_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600)); // Every hour

        loop {
            interval.tick().await;
            info!("Running expired session cleanup");

            match tasks::cleanup_expired_sessions(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    } else {
                        info!("Session cleanup: no expired sessions found");
                    }
                }
                Err(e) => error!("Failed to cleanup expired sessions: {}", e),
            }
        }
    }

    /// Drop expired OTPs and old attempt rows (runs every 30 minutes)
    async fn stale_attempt_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(1800)); // Every 30 minutes

        loop {
            interval.tick().await;

            match tasks::cleanup_stale_attempts(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} stale OTP and attempt rows", count);
                    }
                }
                Err(e) => error!("Failed to cleanup OTP and attempt rows: {}", e),
            }
        }
    }

    /// Forget idle rate limiter buckets (runs every 15 minutes)
    async fn rate_limiter_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(900)); // Every 15 minutes

        loop {
            interval.tick().await;
            scheduler.context.limiters.retain_recent();
        }
    }

    /// Fallback committee snapshot on 1 January and 1 July
    async fn snapshot_fallback_job(scheduler: Arc<Self>) {
        loop {
            let now = scheduler.context.clock.now();
            let boundary = next_fallback_boundary(now);
            info!("Next fallback snapshot check at {}", boundary);

            let wait = (boundary - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            match tasks::fallback_snapshot(&scheduler.context).await {
                Ok(()) => {}
                Err(e) => error!("Fallback committee snapshot failed: {}", e),
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300)); // Every 5 minutes

        loop {
            interval.tick().await;

            match tasks::health_check(&scheduler.context).await {
                Ok(_) => {
                    // Silent success - health is good
                }
                Err(e) => error!("Health check failed: {}", e),
            }
        }
    }
}
