/// Snapshot engine: freezes the live roster into immutable term records
use crate::{
    account::AccountManager,
    clock::Clock,
    committee::{is_assignable_role, CommitteeRoster, LEADERSHIP_ROLES},
    db::models::{AccountStatus, SnapshotRow},
    error::{AppError, AppResult},
    metrics,
};
use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const MIN_TERM_YEARS: u32 = 1;
pub const MAX_TERM_YEARS: u32 = 10;

/// Snapshot listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: i64,
    pub taken_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl From<&SnapshotRow> for SnapshotSummary {
    fn from(row: &SnapshotRow) -> Self {
        Self {
            id: row.id,
            taken_at: row.taken_at,
            period_start: row.period_start,
            period_end: row.period_end,
        }
    }
}

/// Full snapshot with its roster
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(flatten)]
    pub summary: SnapshotSummary,
    pub data: CommitteeRoster,
}

/// Add whole years of term to an instant
pub fn add_term(start: DateTime<Utc>, years: u32) -> AppResult<DateTime<Utc>> {
    start
        .checked_add_months(Months::new(12 * years))
        .ok_or_else(|| AppError::Internal(format!("term end out of range for {}", start)))
}

pub struct SnapshotEngine {
    db: SqlitePool,
    accounts: Arc<AccountManager>,
    clock: Arc<dyn Clock>,
    default_term_years: u32,
    // serializes read-latest-then-insert
    lock: Mutex<()>,
}

impl SnapshotEngine {
    pub fn new(
        db: SqlitePool,
        accounts: Arc<AccountManager>,
        clock: Arc<dyn Clock>,
        default_term_years: u32,
    ) -> Self {
        Self {
            db,
            accounts,
            clock,
            default_term_years,
            lock: Mutex::new(()),
        }
    }

    /// Current term length, falling back to the configured default
    pub async fn term_years(&self) -> AppResult<u32> {
        let stored: Option<i64> =
            sqlx::query_scalar("SELECT term_years FROM committee_settings WHERE id = 1")
                .fetch_optional(&self.db)
                .await?;

        Ok(stored
            .and_then(|years| u32::try_from(years).ok())
            .unwrap_or(self.default_term_years))
    }

    /// Persist a new term length
    pub async fn set_term_years(&self, years: u32) -> AppResult<()> {
        if !(MIN_TERM_YEARS..=MAX_TERM_YEARS).contains(&years) {
            return Err(AppError::Validation(format!(
                "Term must be between {} and {} years",
                MIN_TERM_YEARS, MAX_TERM_YEARS
            )));
        }

        sqlx::query(
            "INSERT INTO committee_settings (id, term_years, updated_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET term_years = excluded.term_years,
                                           updated_at = excluded.updated_at",
        )
        .bind(years as i64)
        .bind(self.clock.now())
        .execute(&self.db)
        .await?;

        info!(term_years = years, "Committee term updated");
        Ok(())
    }

    /// Snapshot with the furthest period end
    pub async fn latest_snapshot(&self) -> AppResult<Option<SnapshotRow>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT id, data, period_start, period_end, taken_at FROM committee_snapshots
             ORDER BY period_end DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;

        Ok(row)
    }

    pub async fn snapshot_count(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM committee_snapshots")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// Roster as it stands right now
    pub async fn live_roster(&self) -> AppResult<CommitteeRoster> {
        let users = self.accounts.committee_roster().await?;
        Ok(CommitteeRoster::from_users(&users))
    }

    /// Capture the live roster for the period following the latest snapshot,
    /// whether or not the current period has ended
    pub async fn take_snapshot(&self, trigger: &str) -> AppResult<Option<SnapshotSummary>> {
        self.snapshot(trigger, false).await
    }

    /// Take a snapshot only when none exists or the latest period has ended.
    ///
    /// The check runs under the engine lock, so triggers racing at a period
    /// boundary produce a single record.
    pub async fn take_snapshot_if_due(&self, trigger: &str) -> AppResult<Option<SnapshotSummary>> {
        self.snapshot(trigger, true).await
    }

    async fn snapshot(&self, trigger: &str, only_if_due: bool) -> AppResult<Option<SnapshotSummary>> {
        let _guard = self.lock.lock().await;

        let now = self.clock.now();
        let period_start = match self.latest_snapshot().await? {
            Some(latest) if only_if_due && latest.period_end > now => {
                debug!(trigger, period_end = %latest.period_end, "Snapshot not due");
                return Ok(None);
            }
            Some(latest) => latest.period_end,
            None => now,
        };

        let term = self.term_years().await?;
        let period_end = add_term(period_start, term)?;
        let roster = self.live_roster().await?;
        let data = serde_json::to_string(&roster)
            .map_err(|e| AppError::Internal(format!("failed to encode roster: {}", e)))?;

        let result = sqlx::query(
            "INSERT INTO committee_snapshots (data, period_start, period_end, taken_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&data)
        .bind(period_start)
        .bind(period_end)
        .bind(now)
        .execute(&self.db)
        .await?;

        let summary = SnapshotSummary {
            id: result.last_insert_rowid(),
            taken_at: now,
            period_start,
            period_end,
        };

        metrics::record_snapshot(trigger);
        info!(
            trigger,
            snapshot_id = summary.id,
            %period_start,
            %period_end,
            leadership = roster.leadership.len(),
            members = roster.member.len(),
            "Committee snapshot taken"
        );

        Ok(Some(summary))
    }

    /// When the next snapshot should be taken
    pub async fn next_run_at(&self) -> AppResult<DateTime<Utc>> {
        match self.latest_snapshot().await? {
            Some(latest) => Ok(latest.period_end),
            None => add_term(self.clock.now(), self.term_years().await?),
        }
    }

    /// Snapshots newest first
    pub async fn list_snapshots(&self) -> AppResult<Vec<SnapshotSummary>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            "SELECT id, data, period_start, period_end, taken_at FROM committee_snapshots
             ORDER BY taken_at DESC, id DESC",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(SnapshotSummary::from).collect())
    }

    pub async fn get_snapshot(&self, id: i64) -> AppResult<Snapshot> {
        if id <= 0 {
            return Err(AppError::Validation("Invalid snapshot id".to_string()));
        }

        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT id, data, period_start, period_end, taken_at FROM committee_snapshots
             WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Snapshot not found".to_string()))?;

        let data: CommitteeRoster = serde_json::from_str(&row.data)
            .map_err(|e| AppError::Internal(format!("corrupt snapshot {}: {}", row.id, e)))?;

        Ok(Snapshot {
            summary: SnapshotSummary::from(&row),
            data: data.sanitized(),
        })
    }

    /// Give a member a committee role; a leadership seat moves from its
    /// previous holder
    pub async fn assign_role(&self, member_id: i64, role: &str) -> AppResult<()> {
        if !is_assignable_role(role) {
            return Err(AppError::Validation(format!("Unknown committee role: {}", role)));
        }

        let user = self
            .accounts
            .get_user(member_id)
            .await?
            .filter(|u| matches!(u.account_status, AccountStatus::Inactive | AccountStatus::Active))
            .ok_or_else(|| AppError::NotFound("Member not found".to_string()))?;

        if LEADERSHIP_ROLES.contains(&role) && user.committee_role.as_deref() != Some(role) {
            let vacated = self.accounts.vacate_committee_role(role).await?;
            if vacated > 0 {
                debug!(role, "Previous holder removed from seat");
            }
        }

        self.accounts.set_committee_role(user.id, Some(role)).await?;
        info!(member_id, role, "Committee role assigned");
        Ok(())
    }

    /// Remove a member from the committee
    pub async fn clear_role(&self, member_id: i64) -> AppResult<()> {
        if !self.accounts.set_committee_role(member_id, None).await? {
            return Err(AppError::NotFound("Member not found".to_string()));
        }
        info!(member_id, "Committee role cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, ManualClock};
    use chrono::Duration;

    async fn engine() -> (SnapshotEngine, Arc<ManualClock>, SqlitePool) {
        let pool = testutil::memory_pool().await;
        let clock = Arc::new(ManualClock::default());
        let accounts = Arc::new(AccountManager::new(pool.clone(), clock.clone()));
        let engine = SnapshotEngine::new(pool.clone(), accounts, clock.clone(), 2);
        (engine, clock, pool)
    }

    #[tokio::test]
    async fn test_first_snapshot_starts_now() {
        let (engine, clock, pool) = engine().await;
        let president = testutil::insert_user(&pool, "pia@example.com", AccountStatus::Active).await;
        engine.assign_role(president, "President").await.unwrap();

        let summary = engine.take_snapshot("manual").await.unwrap().unwrap();
        assert_eq!(summary.period_start, clock.now());
        assert_eq!(summary.period_end, add_term(clock.now(), 2).unwrap());

        let snapshot = engine.get_snapshot(summary.id).await.unwrap();
        assert_eq!(snapshot.data.leadership.len(), 1);
        assert_eq!(snapshot.data.leadership[0].member.id, president);
    }

    #[tokio::test]
    async fn test_next_snapshot_continues_previous_period() {
        let (engine, _clock, _pool) = engine().await;
        let first = engine.take_snapshot("manual").await.unwrap().unwrap();

        engine.set_term_years(3).await.unwrap();
        let second = engine.take_snapshot("manual").await.unwrap().unwrap();

        assert_eq!(second.period_start, first.period_end);
        assert_eq!(second.period_end, add_term(first.period_end, 3).unwrap());
        assert_eq!(engine.snapshot_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_racing_triggers_at_boundary_take_one_snapshot() {
        let (engine, clock, _pool) = engine().await;
        let first = engine.take_snapshot("manual").await.unwrap().unwrap();
        clock.set(first.period_end);

        let (fallback, timer) = tokio::join!(
            engine.take_snapshot_if_due("fallback"),
            engine.take_snapshot_if_due("timer"),
        );
        let taken: Vec<_> = [fallback.unwrap(), timer.unwrap()].into_iter().flatten().collect();

        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].period_start, first.period_end);
        assert_eq!(engine.snapshot_count().await.unwrap(), 2);
        assert_eq!(
            engine.next_run_at().await.unwrap(),
            add_term(first.period_end, 2).unwrap()
        );
    }

    #[tokio::test]
    async fn test_take_if_due() {
        let (engine, clock, _pool) = engine().await;
        assert!(engine.take_snapshot_if_due("fallback").await.unwrap().is_some());
        assert!(engine.take_snapshot_if_due("fallback").await.unwrap().is_none());

        clock.advance(Duration::days(365 * 2 + 1));
        assert!(engine.take_snapshot_if_due("fallback").await.unwrap().is_some());
        assert_eq!(engine.snapshot_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_next_run_at() {
        let (engine, clock, _pool) = engine().await;
        assert_eq!(
            engine.next_run_at().await.unwrap(),
            add_term(clock.now(), 2).unwrap()
        );

        let summary = engine.take_snapshot("manual").await.unwrap().unwrap();
        engine.set_term_years(5).await.unwrap();
        assert_eq!(engine.next_run_at().await.unwrap(), summary.period_end);
    }

    #[tokio::test]
    async fn test_term_bounds() {
        let (engine, _clock, _pool) = engine().await;
        assert_eq!(engine.term_years().await.unwrap(), 2);
        assert!(matches!(engine.set_term_years(0).await, Err(AppError::Validation(_))));
        assert!(matches!(engine.set_term_years(11).await, Err(AppError::Validation(_))));
        engine.set_term_years(10).await.unwrap();
        assert_eq!(engine.term_years().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_get_snapshot_errors() {
        let (engine, _clock, _pool) = engine().await;
        assert!(matches!(engine.get_snapshot(0).await, Err(AppError::Validation(_))));
        assert!(matches!(engine.get_snapshot(-4).await, Err(AppError::Validation(_))));
        assert!(matches!(engine.get_snapshot(99).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_leadership_seat_moves() {
        let (engine, _clock, pool) = engine().await;
        let first = testutil::insert_user(&pool, "first@example.com", AccountStatus::Active).await;
        let second = testutil::insert_user(&pool, "second@example.com", AccountStatus::Inactive).await;

        engine.assign_role(first, "Treasurer").await.unwrap();
        engine.assign_role(second, "Treasurer").await.unwrap();

        let roster = engine.live_roster().await.unwrap();
        assert_eq!(roster.leadership.len(), 1);
        assert_eq!(roster.leadership[0].member.id, second);

        engine.assign_role(first, "Committee Member").await.unwrap();
        let roster = engine.live_roster().await.unwrap();
        assert_eq!(roster.member.len(), 1);

        engine.clear_role(first).await.unwrap();
        assert!(engine.live_roster().await.unwrap().member.is_empty());
    }

    #[tokio::test]
    async fn test_assign_rejects_unknown_role_and_pending_member() {
        let (engine, _clock, pool) = engine().await;
        let pending = testutil::insert_user(&pool, "p@example.com", AccountStatus::Pending).await;
        let active = testutil::insert_user(&pool, "a@example.com", AccountStatus::Active).await;

        assert!(matches!(
            engine.assign_role(active, "Emperor").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            engine.assign_role(pending, "President").await,
            Err(AppError::NotFound(_))
        ));
    }
}
