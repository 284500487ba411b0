/// Background task implementations
use crate::{context::AppContext, error::AppResult, metrics};
use chrono::Duration;

/// How long OTP and login attempt rows are kept for lockout accounting
const ATTEMPT_RETENTION_HOURS: i64 = 24;

fn finish<T>(job: &str, result: AppResult<T>) -> AppResult<T> {
    metrics::record_background_job(job, if result.is_ok() { "success" } else { "error" });
    result
}

/// Cleanup expired sessions
pub async fn cleanup_expired_sessions(ctx: &AppContext) -> AppResult<u64> {
    finish("session_cleanup", ctx.sessions.purge_expired().await)
}

/// Cleanup expired OTPs and attempt rows past retention
pub async fn cleanup_stale_attempts(ctx: &AppContext) -> AppResult<u64> {
    let result = ctx
        .otps
        .purge_stale(Duration::hours(ATTEMPT_RETENTION_HOURS))
        .await;
    finish("attempt_cleanup", result)
}

/// Biannual safety net for the snapshot timer
pub async fn fallback_snapshot(ctx: &AppContext) -> AppResult<()> {
    finish("snapshot_fallback", ctx.scheduler.run_fallback().await)
}

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> AppResult<()> {
    let result = sqlx::query("SELECT 1")
        .fetch_one(&ctx.db)
        .await
        .map(|_| ())
        .map_err(Into::into);
    finish("health_check", result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::Clock,
        db::models::{AccountStatus, Role},
        testutil,
    };

    #[tokio::test]
    async fn test_cleanup_expired_sessions_keeps_live_ones() {
        let h = testutil::harness().await;
        let stale = testutil::insert_user(&h.pool, "stale@example.com", AccountStatus::Active).await;
        let live = testutil::insert_user(&h.pool, "live@example.com", AccountStatus::Active).await;

        h.sessions.issue(stale, Role::Member, "10.0.0.1", None).await.unwrap();
        h.clock.advance(Duration::minutes(45));
        h.sessions.issue(live, Role::Member, "10.0.0.2", None).await.unwrap();
        h.clock.advance(Duration::minutes(30));

        assert_eq!(cleanup_expired_sessions(&h.ctx).await.unwrap(), 1);
        assert_eq!(h.sessions.count_for_user(stale).await.unwrap(), 0);
        assert_eq!(h.sessions.count_for_user(live).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_stale_attempts_respects_retention() {
        let h = testutil::harness().await;
        h.otps.record_otp_failure("old@example.com", "10.0.0.1").await.unwrap();
        h.otps
            .record_login_attempt("old@example.com", "10.0.0.1", None, false)
            .await
            .unwrap();
        h.clock.advance(Duration::hours(ATTEMPT_RETENTION_HOURS + 1));
        h.otps.record_otp_failure("new@example.com", "10.0.0.1").await.unwrap();

        assert_eq!(cleanup_stale_attempts(&h.ctx).await.unwrap(), 2);
        assert_eq!(
            h.otps
                .count_recent_failures("new@example.com", "10.0.0.1", Duration::hours(1))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_fallback_snapshot_only_when_due() {
        let h = testutil::harness().await;

        fallback_snapshot(&h.ctx).await.unwrap();
        assert_eq!(h.ctx.snapshots.snapshot_count().await.unwrap(), 1);

        fallback_snapshot(&h.ctx).await.unwrap();
        assert_eq!(h.ctx.snapshots.snapshot_count().await.unwrap(), 1);

        h.clock.advance(Duration::days(365 * 2 + 1));
        fallback_snapshot(&h.ctx).await.unwrap();
        assert_eq!(h.ctx.snapshots.snapshot_count().await.unwrap(), 2);
        assert!(h.ctx.scheduler.next_run().unwrap() > h.clock.now());
        h.ctx.scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = testutil::harness().await;
        tokio_test::assert_ok!(health_check(&h.ctx).await);
        h.pool.close().await;
        tokio_test::assert_err!(health_check(&h.ctx).await);
    }
}
