/// Self-rescheduling snapshot timer
///
/// The scheduler owns exactly one timer slot. Every computed schedule goes
/// through [`TimerSlot::arm`], which aborts whatever was armed before, so at
/// most one pending firing exists at any time.
use crate::{
    clock::Clock,
    committee::engine::{SnapshotEngine, SnapshotSummary},
    error::AppResult,
};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt};
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, Weak},
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Upper bound on snapshots taken back to back while catching up
pub const MAX_CATCH_UP_RUNS: usize = 64;

/// Longest single sleep before the clock is consulted again
const MAX_SLEEP_CHUNK: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

fn retry_delay() -> Duration {
    Duration::hours(1)
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    due: Option<DateTime<Utc>>,
    handle: Option<JoinHandle<()>>,
}

/// Holder of at most one outstanding timer task
#[derive(Clone)]
pub struct TimerSlot {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<SlotState>>,
}

impl TimerSlot {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(SlotState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `task` at `at`, replacing any previously armed task
    pub fn arm<F>(&self, at: DateTime<Utc>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        if let Some(previous) = state.handle.take() {
            previous.abort();
        }
        state.generation += 1;
        state.due = Some(at);

        let generation = state.generation;
        let slot = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);

        state.handle = Some(tokio::spawn(async move {
            sleep_until(clock.as_ref(), at).await;

            {
                let mut state = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if state.generation != generation {
                    return;
                }
                // detach so re-arming from inside the task cannot abort it
                state.handle = None;
                state.due = None;
            }

            task.await;
        }));
    }

    /// Drop the armed task, if any
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.due = None;
        if let Some(handle) = state.handle.take() {
            handle.abort();
        }
    }

    /// Instant the armed task will fire at
    pub fn due(&self) -> Option<DateTime<Utc>> {
        self.lock().due
    }

    pub fn is_armed(&self) -> bool {
        self.lock().handle.is_some()
    }
}

/// Sleep until the clock reads `at`, in bounded chunks
async fn sleep_until(clock: &dyn Clock, at: DateTime<Utc>) {
    loop {
        let now = clock.now();
        if at <= now {
            return;
        }
        let remaining = (at - now).to_std().unwrap_or_default();
        tokio::time::sleep(remaining.min(MAX_SLEEP_CHUNK)).await;
    }
}

/// Next 1 January or 1 July, 00:00 UTC, strictly after `now`
pub fn next_fallback_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let year = now.year();
    [(year, 1), (year, 7), (year + 1, 1)]
        .into_iter()
        .filter_map(|(y, m)| Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).single())
        .find(|boundary| *boundary > now)
        .unwrap_or_else(|| now + Duration::days(183))
}

/// Keeps the next committee snapshot armed
pub struct SnapshotScheduler {
    engine: Arc<SnapshotEngine>,
    clock: Arc<dyn Clock>,
    slot: TimerSlot,
}

impl SnapshotScheduler {
    pub fn new(engine: Arc<SnapshotEngine>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            slot: TimerSlot::new(Arc::clone(&clock)),
            engine,
            clock,
        })
    }

    pub fn engine(&self) -> &Arc<SnapshotEngine> {
        &self.engine
    }

    /// Catch up on overdue periods, then arm the timer for the next one
    pub async fn schedule_next(self: &Arc<Self>) -> AppResult<DateTime<Utc>> {
        for _ in 0..MAX_CATCH_UP_RUNS {
            let next = self.engine.next_run_at().await?;
            if next > self.clock.now() {
                self.arm(next);
                info!(next_run = %next, "Next committee snapshot scheduled");
                return Ok(next);
            }

            warn!(due = %next, "Committee snapshot overdue, taking it now");
            self.engine.take_snapshot_if_due("catch-up").await?;
        }

        let retry_at = self.clock.now() + retry_delay();
        error!(
            runs = MAX_CATCH_UP_RUNS,
            retry_at = %retry_at,
            "Snapshot catch-up limit reached"
        );
        self.arm(retry_at);
        Ok(retry_at)
    }

    /// Apply a new term length and re-arm
    pub async fn update_term(self: &Arc<Self>, years: u32) -> AppResult<DateTime<Utc>> {
        self.engine.set_term_years(years).await?;

        self.engine.take_snapshot_if_due("settings").await?;
        self.schedule_next().await
    }

    /// Biannual safety net; a no-op when the timer already covered the period
    pub async fn run_fallback(self: &Arc<Self>) -> AppResult<()> {
        if self.engine.take_snapshot_if_due("fallback").await?.is_some() {
            self.schedule_next().await?;
        }
        Ok(())
    }

    /// Take a snapshot on request and re-arm from the new period end
    pub async fn take_manual(self: &Arc<Self>) -> AppResult<Option<SnapshotSummary>> {
        let summary = self.engine.take_snapshot("manual").await?;
        self.schedule_next().await?;
        Ok(summary)
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.slot.due()
    }

    pub fn shutdown(&self) {
        self.slot.cancel();
    }

    fn arm(self: &Arc<Self>, at: DateTime<Utc>) {
        self.slot.arm(at, Self::fire(Arc::downgrade(self)));
    }

    fn fire(scheduler: Weak<Self>) -> BoxFuture<'static, ()> {
        async move {
            let Some(scheduler) = scheduler.upgrade() else {
                return;
            };

            if let Err(e) = scheduler.engine.take_snapshot_if_due("timer").await {
                error!("Scheduled committee snapshot failed: {}", e);
            }

            if let Err(e) = scheduler.schedule_next().await {
                let retry_at = scheduler.clock.now() + retry_delay();
                error!(retry_at = %retry_at, "Failed to reschedule committee snapshot: {}", e);
                scheduler.arm(retry_at);
            }
        }
        .boxed()
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        self.slot.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::AccountManager,
        committee::engine::add_term,
        testutil::{self, ManualClock},
    };
    use sqlx::SqlitePool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    async fn scheduler_with(clock: Arc<ManualClock>) -> (Arc<SnapshotScheduler>, SqlitePool) {
        let pool = testutil::memory_pool().await;
        let accounts = Arc::new(AccountManager::new(pool.clone(), clock.clone()));
        let engine = Arc::new(SnapshotEngine::new(pool.clone(), accounts, clock.clone(), 2));
        (SnapshotScheduler::new(engine, clock), pool)
    }

    async fn insert_snapshot(pool: &SqlitePool, start: DateTime<Utc>, end: DateTime<Utc>) {
        sqlx::query(
            "INSERT INTO committee_snapshots (data, period_start, period_end, taken_at)
             VALUES ('{\"leadership\":[],\"member\":[]}', ?1, ?2, ?1)",
        )
        .bind(start)
        .bind(end)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_settings_update_takes_first_snapshot() {
        let clock = Arc::new(ManualClock::default());
        let (scheduler, _pool) = scheduler_with(clock.clone()).await;
        let engine = scheduler.engine().clone();

        let next = scheduler.update_term(2).await.unwrap();
        assert_eq!(engine.snapshot_count().await.unwrap(), 1);

        let latest = engine.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.period_start, clock.now());
        assert_eq!(latest.period_end, add_term(clock.now(), 2).unwrap());
        assert_eq!(next, latest.period_end);
        assert_eq!(scheduler.next_run(), Some(latest.period_end));

        // a longer term does not move the current period's end
        let next = scheduler.update_term(3).await.unwrap();
        assert_eq!(engine.snapshot_count().await.unwrap(), 1);
        assert_eq!(next, latest.period_end);
        assert_eq!(scheduler.next_run(), Some(latest.period_end));
        assert_eq!(engine.term_years().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_settings_update_after_period_ended() {
        let clock = Arc::new(ManualClock::default());
        let (scheduler, pool) = scheduler_with(clock.clone()).await;
        let now = clock.now();
        insert_snapshot(&pool, now - Duration::days(800), now - Duration::days(70)).await;

        scheduler.update_term(1).await.unwrap();

        let engine = scheduler.engine();
        assert_eq!(engine.snapshot_count().await.unwrap(), 2);
        let latest = engine.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.period_start, now - Duration::days(70));
        assert!(latest.period_end > now);
    }

    #[tokio::test]
    async fn test_catch_up_fills_missed_periods() {
        let clock = Arc::new(ManualClock::default());
        let (scheduler, pool) = scheduler_with(clock.clone()).await;
        let now = clock.now();
        let end = now - Duration::days(365 * 5);
        insert_snapshot(&pool, end - Duration::days(365 * 2), end).await;

        let next = scheduler.schedule_next().await.unwrap();

        // three two-year periods bring the end past now
        let engine = scheduler.engine();
        assert_eq!(engine.snapshot_count().await.unwrap(), 4);
        assert!(next > now);
        assert_eq!(next, engine.latest_snapshot().await.unwrap().unwrap().period_end);
    }

    #[tokio::test]
    async fn test_catch_up_is_bounded() {
        let clock = Arc::new(ManualClock::default());
        let (scheduler, pool) = scheduler_with(clock.clone()).await;
        scheduler.engine().set_term_years(1).await.unwrap();
        let now = clock.now();
        let end = now - Duration::days(365 * 100);
        insert_snapshot(&pool, end - Duration::days(365), end).await;

        let next = scheduler.schedule_next().await.unwrap();

        assert_eq!(
            scheduler.engine().snapshot_count().await.unwrap(),
            1 + MAX_CATCH_UP_RUNS as i64
        );
        assert_eq!(next, now + Duration::hours(1));
        assert_eq!(scheduler.next_run(), Some(next));
    }

    #[tokio::test]
    async fn test_timer_fires_and_rearms() {
        let clock = Arc::new(ManualClock::ticking(Utc::now()));
        let (scheduler, pool) = scheduler_with(clock.clone()).await;
        let now = clock.now();
        insert_snapshot(&pool, now - Duration::days(365), now + Duration::milliseconds(200)).await;

        let first = scheduler.schedule_next().await.unwrap();
        assert_eq!(first, now + Duration::milliseconds(200));

        tokio::time::sleep(StdDuration::from_millis(800)).await;

        let engine = scheduler.engine();
        assert_eq!(engine.snapshot_count().await.unwrap(), 2);
        let latest = engine.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.period_start, first);
        assert_eq!(scheduler.next_run(), Some(latest.period_end));
    }

    #[tokio::test]
    async fn test_fallback_tolerates_recent_snapshot() {
        let clock = Arc::new(ManualClock::default());
        let (scheduler, _pool) = scheduler_with(clock.clone()).await;

        scheduler.run_fallback().await.unwrap();
        scheduler.run_fallback().await.unwrap();
        assert_eq!(scheduler.engine().snapshot_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_timer_and_fallback_at_same_boundary() {
        let clock = Arc::new(ManualClock::default());
        let (scheduler, pool) = scheduler_with(clock.clone()).await;
        let now = clock.now();
        insert_snapshot(&pool, now - Duration::days(730), now).await;

        let timer = SnapshotScheduler::fire(Arc::downgrade(&scheduler));
        let (fallback, ()) = tokio::join!(scheduler.run_fallback(), timer);
        fallback.unwrap();

        let engine = scheduler.engine();
        assert_eq!(engine.snapshot_count().await.unwrap(), 2);
        let latest = engine.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.period_start, now);
        assert_eq!(latest.period_end, add_term(now, 2).unwrap());
        assert_eq!(scheduler.next_run(), Some(latest.period_end));
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_slot_rearm_replaces_previous_task() {
        let clock = Arc::new(ManualClock::ticking(Utc::now()));
        let slot = TimerSlot::new(clock.clone());
        let fired = Arc::new(AtomicUsize::new(0));

        let first = fired.clone();
        slot.arm(clock.now() + Duration::milliseconds(50), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = fired.clone();
        let at = clock.now() + Duration::milliseconds(100);
        slot.arm(at, async move {
            second.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(slot.due(), Some(at));

        tokio::time::sleep(StdDuration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(!slot.is_armed());
        assert_eq!(slot.due(), None);
    }

    #[tokio::test]
    async fn test_slot_cancel() {
        let clock = Arc::new(ManualClock::ticking(Utc::now()));
        let slot = TimerSlot::new(clock.clone());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        slot.arm(clock.now() + Duration::milliseconds(50), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.is_armed());
        slot.cancel();

        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!slot.is_armed());
    }

    #[test]
    fn test_next_fallback_boundary() {
        let at = |y, m, d, h| Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap();

        assert_eq!(next_fallback_boundary(at(2025, 3, 14, 9)), at(2025, 7, 1, 0));
        assert_eq!(next_fallback_boundary(at(2025, 7, 1, 0)), at(2026, 1, 1, 0));
        assert_eq!(next_fallback_boundary(at(2025, 12, 31, 23)), at(2026, 1, 1, 0));
        assert_eq!(next_fallback_boundary(at(2025, 1, 1, 0)), at(2025, 7, 1, 0));
    }
}
