/// Session registry
///
/// Opaque 512-bit tokens, stored only as SHA-256 digests. A user holds at most
/// one live session: issuing a new one deletes every prior row for that user.
/// Expiry is checked lazily at lookup.
use crate::{
    clock::Clock,
    db::models::{Role, SessionRow},
    error::AppResult,
};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;

const TOKEN_BYTES: usize = 64;

/// A live session resolved from a presented token
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: i64,
    pub role: Role,
    pub ip: String,
    pub user_agent: Option<String>,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Digest under which a token is stored
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Server-side session store
pub struct SessionRegistry {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { db, clock, ttl }
    }

    /// Session lifetime applied at issue and refresh
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a new session, evicting every prior session of the user
    pub async fn issue(
        &self,
        user_id: i64,
        role: Role,
        ip: &str,
        user_agent: Option<&str>,
    ) -> AppResult<Session> {
        let token = generate_token();
        let now = self.clock.now();
        let expires_at = now + self.ttl;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM session_tokens WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO session_tokens (token_hash, user_id, role, ip, user_agent, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(role)
        .bind(ip)
        .bind(user_agent)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(user_id, "session issued");

        Ok(Session {
            user_id,
            role,
            ip: ip.to_string(),
            user_agent: user_agent.map(str::to_string),
            token,
            expires_at,
        })
    }

    /// Resolve a token; `None` when unknown or past expiry
    pub async fn lookup(&self, token: &str) -> AppResult<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT token_hash, user_id, role, ip, user_agent, created_at, expires_at
             FROM session_tokens WHERE token_hash = ?1",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.db)
        .await?;

        Ok(row
            .filter(|row| self.clock.now() <= row.expires_at)
            .map(|row| Session {
                user_id: row.user_id,
                role: row.role,
                ip: row.ip,
                user_agent: row.user_agent,
                token: token.to_string(),
                expires_at: row.expires_at,
            }))
    }

    /// Push expiry to now + `duration`; `None` if the session is gone
    pub async fn extend(&self, token: &str, duration: Duration) -> AppResult<Option<DateTime<Utc>>> {
        let now = self.clock.now();
        let expires_at = now + duration;
        let result = sqlx::query(
            "UPDATE session_tokens SET expires_at = ?1 WHERE token_hash = ?2 AND expires_at >= ?3",
        )
        .bind(expires_at)
        .bind(hash_token(token))
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok((result.rows_affected() == 1).then_some(expires_at))
    }

    /// Delete a session; unknown tokens are a no-op
    pub async fn revoke(&self, token: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM session_tokens WHERE token_hash = ?1")
            .bind(hash_token(token))
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Delete every session of a user
    pub async fn revoke_all_for_user(&self, user_id: i64) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM session_tokens WHERE user_id = ?1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of rows, live or expired, held for a user
    pub async fn count_for_user(&self, user_id: i64) -> AppResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM session_tokens WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Remove expired rows
    pub async fn purge_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM session_tokens WHERE expires_at < ?1")
            .bind(self.clock.now())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, ManualClock};

    async fn setup() -> (SessionRegistry, Arc<ManualClock>, i64) {
        let pool = testutil::memory_pool().await;
        let clock = Arc::new(ManualClock::default());
        let user_id = testutil::insert_user(&pool, "ada@example.com", crate::db::models::AccountStatus::Active).await;
        let registry = SessionRegistry::new(pool, clock.clone(), Duration::hours(1));
        (registry, clock, user_id)
    }

    #[tokio::test]
    async fn test_issue_and_lookup() {
        let (registry, _clock, user_id) = setup().await;
        let session = registry
            .issue(user_id, Role::Member, "10.0.0.1", Some("test-agent"))
            .await
            .unwrap();

        assert_eq!(session.token.len(), TOKEN_BYTES * 2);

        let found = registry.lookup(&session.token).await.unwrap().unwrap();
        assert_eq!(found.user_id, user_id);
        assert_eq!(found.ip, "10.0.0.1");
        assert_eq!(found.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(found.token, session.token);
    }

    #[tokio::test]
    async fn test_token_is_not_stored_raw() {
        let (registry, _clock, user_id) = setup().await;
        let session = registry.issue(user_id, Role::Member, "ip", None).await.unwrap();

        let stored: String = sqlx::query_scalar("SELECT token_hash FROM session_tokens")
            .fetch_one(&registry.db)
            .await
            .unwrap();
        assert_ne!(stored, session.token);
        assert_eq!(stored, hash_token(&session.token));
    }

    #[tokio::test]
    async fn test_new_session_evicts_prior() {
        let (registry, _clock, user_id) = setup().await;
        let a = registry.issue(user_id, Role::Member, "ip", None).await.unwrap();
        let b = registry.issue(user_id, Role::Member, "ip", None).await.unwrap();

        assert!(registry.lookup(&a.token).await.unwrap().is_none());
        assert!(registry.lookup(&b.token).await.unwrap().is_some());
        assert_eq!(registry.count_for_user(user_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lazy_expiry_and_extend() {
        let (registry, clock, user_id) = setup().await;
        let session = registry.issue(user_id, Role::Member, "ip", None).await.unwrap();

        clock.advance(Duration::minutes(50));
        let extended = registry.extend(&session.token, Duration::hours(1)).await.unwrap();
        assert_eq!(extended, Some(clock.now() + Duration::hours(1)));

        clock.advance(Duration::minutes(50));
        assert!(registry.lookup(&session.token).await.unwrap().is_some());

        clock.advance(Duration::minutes(11));
        assert!(registry.lookup(&session.token).await.unwrap().is_none());
        assert_eq!(registry.extend(&session.token, Duration::hours(1)).await.unwrap(), None);

        assert_eq!(registry.purge_expired().await.unwrap(), 1);
        assert_eq!(registry.count_for_user(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (registry, _clock, user_id) = setup().await;
        let session = registry.issue(user_id, Role::Member, "ip", None).await.unwrap();

        registry.revoke(&session.token).await.unwrap();
        registry.revoke(&session.token).await.unwrap();
        registry.revoke("never-issued").await.unwrap();
        assert!(registry.lookup(&session.token).await.unwrap().is_none());
    }
}
