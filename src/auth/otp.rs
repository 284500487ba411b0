/// OTP ledger and attempt ledgers
///
/// One login code per email (upsert), plus two append-only ledgers: password
/// attempts (lockout) and failed OTP redemptions (rate limit). Counting and
/// recording are separate steps run by the caller.
use crate::{clock::Clock, db::models::LoginOtp, error::AppResult};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Generate a uniformly random 6-digit code
pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..=999_999u32).to_string()
}

/// Login code and attempt storage
pub struct OtpLedger {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl OtpLedger {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Issue a fresh code for an email, replacing any earlier one
    pub async fn issue_otp(&self, email: &str, ttl: Duration) -> AppResult<String> {
        let code = generate_otp();
        self.store_otp(email, &code, ttl).await?;
        Ok(code)
    }

    /// Store a specific code for an email, replacing any earlier one
    pub async fn store_otp(&self, email: &str, code: &str, ttl: Duration) -> AppResult<DateTime<Utc>> {
        let now = self.clock.now();
        let expires_at = now + ttl;
        sqlx::query(
            "INSERT INTO login_otp (email, otp, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(email) DO UPDATE SET
                otp = excluded.otp,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at",
        )
        .bind(email)
        .bind(code)
        .bind(expires_at)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(expires_at)
    }

    /// True when a code exists for the email, matches, and has not expired
    pub async fn verify_otp(&self, email: &str, code: &str) -> AppResult<bool> {
        let row = sqlx::query_as::<_, LoginOtp>(
            "SELECT email, otp, expires_at, created_at FROM login_otp WHERE email = ?1",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        Ok(match row {
            Some(row) => row.otp == code.trim() && self.clock.now() <= row.expires_at,
            None => false,
        })
    }

    /// Delete the code of an email
    pub async fn consume_otp(&self, email: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM login_otp WHERE email = ?1")
            .bind(email)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Append a failed OTP redemption
    pub async fn record_otp_failure(&self, email: &str, ip: &str) -> AppResult<()> {
        sqlx::query("INSERT INTO otp_attempts (email, ip, attempted_at) VALUES (?1, ?2, ?3)")
            .bind(email)
            .bind(ip)
            .bind(self.clock.now())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Failed OTP redemptions for (email, ip) inside the trailing window
    pub async fn count_recent_failures(&self, email: &str, ip: &str, window: Duration) -> AppResult<i64> {
        let since = self.clock.now() - window;
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM otp_attempts WHERE email = ?1 AND ip = ?2 AND attempted_at > ?3",
        )
        .bind(email)
        .bind(ip)
        .bind(since)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    /// Forget failed OTP redemptions for (email, ip)
    pub async fn clear_attempts(&self, email: &str, ip: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM otp_attempts WHERE email = ?1 AND ip = ?2")
            .bind(email)
            .bind(ip)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Append a password attempt, successful or not
    pub async fn record_login_attempt(
        &self,
        email: &str,
        ip: &str,
        user_agent: Option<&str>,
        success: bool,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO login_attempts (email, ip, user_agent, success, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(email)
        .bind(ip)
        .bind(user_agent)
        .bind(success)
        .bind(self.clock.now())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Failed password attempts for an email inside the trailing window,
    /// counting only those after the most recent success
    pub async fn count_login_failures(&self, email: &str, window: Duration) -> AppResult<i64> {
        let since = self.clock.now() - window;
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM login_attempts
             WHERE email = ?1 AND success = 0 AND attempted_at > ?2
               AND id > COALESCE(
                   (SELECT MAX(id) FROM login_attempts WHERE email = ?1 AND success = 1), 0)",
        )
        .bind(email)
        .bind(since)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    /// Start a fresh failure streak for an email, as after an admin unlock.
    /// The marker row counts as a success for lockout accounting.
    pub async fn reset_login_failures(&self, email: &str, ip: &str) -> AppResult<()> {
        self.record_login_attempt(email, ip, None, true).await
    }

    /// Drop codes that have expired and ledger rows older than `retain`
    pub async fn purge_stale(&self, retain: Duration) -> AppResult<u64> {
        let now = self.clock.now();
        let cutoff = now - retain;
        let mut removed = sqlx::query("DELETE FROM login_otp WHERE expires_at < ?1")
            .bind(now)
            .execute(&self.db)
            .await?
            .rows_affected();
        removed += sqlx::query("DELETE FROM otp_attempts WHERE attempted_at < ?1")
            .bind(cutoff)
            .execute(&self.db)
            .await?
            .rows_affected();
        removed += sqlx::query("DELETE FROM login_attempts WHERE attempted_at < ?1")
            .bind(cutoff)
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(removed)
    }
}
