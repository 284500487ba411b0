/// Client-side session watcher
///
/// Mirrors what a signed-in client does to keep its session alive: a refresh
/// pulse while the user is active, and a local logout once the user has been
/// idle too long or the server stops honouring the session (for example
/// because the account signed in somewhere else).

pub mod http;

pub use http::HttpSessionApi;

use crate::error::AppResult;
use async_trait::async_trait;
use futures::future::OptionFuture;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Server calls the watcher needs
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Extend the current session; an error means it is no longer valid
    async fn refresh(&self) -> AppResult<()>;

    /// Revoke the current session on the server
    async fn logout(&self) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub idle_check_interval: Duration,
    pub idle_limit: Duration,
    pub refresh_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            idle_check_interval: Duration::from_secs(60),
            idle_limit: Duration::from_secs(30 * 60),
            refresh_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// No activity within the idle limit
    Inactivity,
    /// The server rejected a refresh
    Conflict,
}

impl LogoutReason {
    pub fn message(&self) -> &'static str {
        match self {
            LogoutReason::Inactivity => "You have been logged out due to inactivity.",
            LogoutReason::Conflict => {
                "You have been logged out because your account was logged in elsewhere."
            }
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogoutReason::Inactivity => "inactivity",
            LogoutReason::Conflict => "conflict",
        })
    }
}

/// Delivered once when the watcher signs the user out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutNotice {
    pub reason: LogoutReason,
    pub message: &'static str,
}

struct Shared {
    last_activity: Mutex<Instant>,
    stopped: AtomicBool,
}

impl Shared {
    fn idle_for(&self) -> Duration {
        let last = *self.last_activity.lock().unwrap_or_else(|p| p.into_inner());
        Instant::now().saturating_duration_since(last)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Handle to a running watcher; dropping it stops the timers
pub struct SessionWatcher {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SessionWatcher {
    /// Start both timers. The receiver yields at most one notice.
    pub fn start(
        api: Arc<dyn SessionApi>,
        config: WatcherConfig,
    ) -> (Self, oneshot::Receiver<LogoutNotice>) {
        let shared = Arc::new(Shared {
            last_activity: Mutex::new(Instant::now()),
            stopped: AtomicBool::new(false),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (notice_tx, notice_rx) = oneshot::channel();

        let task = tokio::spawn(run(api, config, Arc::clone(&shared), shutdown_rx, notice_tx));
        info!("Session watcher started");

        (
            Self {
                shared,
                shutdown,
                task: Some(task),
            },
            notice_rx,
        )
    }

    /// Note user activity
    pub fn record_activity(&self) {
        *self.shared.last_activity.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    /// Stop both timers; a refresh still in flight is allowed to finish but
    /// its outcome is discarded
    pub fn stop(&mut self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        self.task.take();
        debug!("Session watcher stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.shared.is_stopped() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SessionWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    api: Arc<dyn SessionApi>,
    config: WatcherConfig,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    notice: oneshot::Sender<LogoutNotice>,
) {
    let start = Instant::now();
    let mut idle_check = interval_at(start + config.idle_check_interval, config.idle_check_interval);
    let mut refresh = interval_at(start + config.refresh_interval, config.refresh_interval);
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // refresh calls run on their own task so idle checks keep ticking
    let mut in_flight: Option<JoinHandle<AppResult<()>>> = None;

    let reason = loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = idle_check.tick() => {
                if shared.idle_for() > config.idle_limit {
                    break LogoutReason::Inactivity;
                }
            }
            _ = refresh.tick(), if in_flight.is_none() => {
                if shared.idle_for() >= config.idle_limit {
                    continue;
                }
                let api = Arc::clone(&api);
                in_flight = Some(tokio::spawn(async move { api.refresh().await }));
            }
            Some(joined) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                in_flight = None;
                if shared.is_stopped() {
                    return;
                }
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Session refresh failed: {}", e);
                        break LogoutReason::Conflict;
                    }
                    Err(e) => {
                        warn!("Session refresh task ended abnormally: {}", e);
                        break LogoutReason::Conflict;
                    }
                }
            }
        }
    };

    if let Err(e) = api.logout().await {
        warn!("Failed to clear server session: {}", e);
    }
    if shared.is_stopped() {
        return;
    }

    shared.stopped.store(true, Ordering::SeqCst);
    info!(%reason, "Session watcher signed the user out");
    let _ = notice.send(LogoutNotice {
        reason,
        message: reason.message(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot::error::TryRecvError;

    #[derive(Default)]
    struct FakeApi {
        refreshes: AtomicUsize,
        logouts: AtomicUsize,
        fail_refresh: bool,
        refresh_delay: Duration,
    }

    #[async_trait]
    impl SessionApi for FakeApi {
        async fn refresh(&self) -> AppResult<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if !self.refresh_delay.is_zero() {
                tokio::time::sleep(self.refresh_delay).await;
            }
            if self.fail_refresh {
                return Err(AppError::Authentication("Session expired".to_string()));
            }
            Ok(())
        }

        async fn logout(&self) -> AppResult<()> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Internal("offline".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_user_is_signed_out() {
        let api = Arc::new(FakeApi::default());
        let start = Instant::now();
        let (_watcher, notice) = SessionWatcher::start(api.clone(), WatcherConfig::default());

        let notice = notice.await.unwrap();
        assert_eq!(notice.reason, LogoutReason::Inactivity);
        assert_eq!(notice.message, "You have been logged out due to inactivity.");
        assert!(start.elapsed() > Duration::from_secs(30 * 60));
        assert!(start.elapsed() <= Duration::from_secs(32 * 60));

        assert!(api.refreshes.load(Ordering::SeqCst) > 0);
        assert_eq!(api.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_keeps_session_alive() {
        let api = Arc::new(FakeApi::default());
        let (watcher, mut notice) = SessionWatcher::start(api.clone(), WatcherConfig::default());

        for _ in 0..12 {
            tokio::time::sleep(Duration::from_secs(10 * 60)).await;
            watcher.record_activity();
        }

        assert!(matches!(notice.try_recv(), Err(TryRecvError::Empty)));
        // two hours of pulses every thirty seconds
        assert!(api.refreshes.load(Ordering::SeqCst) >= 200);
        assert_eq!(api.logouts.load(Ordering::SeqCst), 0);
        assert!(watcher.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_refresh_signs_out_with_conflict() {
        let api = Arc::new(FakeApi {
            fail_refresh: true,
            ..Default::default()
        });
        let start = Instant::now();
        let (_watcher, notice) = SessionWatcher::start(api.clone(), WatcherConfig::default());

        let notice = notice.await.unwrap();
        assert_eq!(notice.reason, LogoutReason::Conflict);
        assert!(start.elapsed() < Duration::from_secs(60));
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(api.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_refresh() {
        let api = Arc::new(FakeApi {
            fail_refresh: true,
            refresh_delay: Duration::from_secs(10),
            ..Default::default()
        });
        let (mut watcher, notice) = SessionWatcher::start(api.clone(), WatcherConfig::default());

        // first pulse at 30s is still waiting on the server at 35s
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 1);
        watcher.stop();
        assert!(!watcher.is_running());

        assert!(notice.await.is_err());
        assert_eq!(api.logouts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_check_runs_while_refresh_pending() {
        let api = Arc::new(FakeApi {
            refresh_delay: Duration::from_secs(45 * 60),
            ..Default::default()
        });
        let start = Instant::now();
        let (_watcher, notice) = SessionWatcher::start(api.clone(), WatcherConfig::default());

        let notice = notice.await.unwrap();
        assert_eq!(notice.reason, LogoutReason::Inactivity);
        assert!(start.elapsed() <= Duration::from_secs(32 * 60));
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(api.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_watcher() {
        let api = Arc::new(FakeApi::default());
        let (watcher, notice) = SessionWatcher::start(api.clone(), WatcherConfig::default());
        drop(watcher);

        assert!(notice.await.is_err());
        assert_eq!(api.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(api.logouts.load(Ordering::SeqCst), 0);
    }
}
