/// Test doubles and fixtures shared by unit and integration tests
///
/// Everything here favours determinism over realism: a clock that only
/// moves when told to, a mailer that keeps what it was asked to send, and
/// an audit sink that remembers events in memory.
use crate::{
    account::AccountManager,
    audit::{SecurityEvent, SecurityLog},
    auth::{password::hash_password, AuthService, OtpLedger, SessionRegistry},
    captcha::CaptchaVerifier,
    clock::Clock,
    config::{
        AuthConfig, CommitteeConfig, LoggingConfig, RateLimitConfig, ServerConfig, ServiceConfig,
        StorageConfig,
    },
    context::AppContext,
    db::{
        self,
        models::{AccountStatus, Role},
    },
    error::{AppError, AppResult},
    mailer::Mailer,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::SqlitePool;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

/// Fresh in-memory database with the schema applied
pub async fn memory_pool() -> SqlitePool {
    db::create_memory_pool()
        .await
        .expect("in-memory database")
}

/// Configuration with valid secrets, a fast bcrypt cost and roomy limits
pub fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "127.0.0.1".to_string(),
            port: 3001,
            frontend_base_url: "http://localhost:5173".to_string(),
            cors_origin: None,
            trust_proxy: false,
            version: "test".to_string(),
        },
        storage: StorageConfig {
            database_path: PathBuf::from(":memory:"),
        },
        authentication: AuthConfig {
            reset_password_secret: "reset-secret-for-tests-0123456789abcdef".to_string(),
            csrf_secret: "csrf-secret-for-tests-0123456789abcdef".to_string(),
            bcrypt_cost: 4,
            cookie_secure: false,
        },
        email: None,
        captcha: None,
        rate_limit: RateLimitConfig {
            enabled: true,
            auth_requests_per_window: 1000,
            login_requests_per_window: 1000,
        },
        committee: CommitteeConfig {
            default_term_years: 2,
            snapshot_fallback_enabled: false,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            json: false,
        },
    }
}

/// Insert a user directly, bypassing signup
pub async fn insert_user(pool: &SqlitePool, email: &str, status: AccountStatus) -> i64 {
    insert_member(pool, email, None, Role::Member, status).await
}

/// Insert a user with a real password hash and the given role
pub async fn insert_member(
    pool: &SqlitePool,
    email: &str,
    password: Option<&str>,
    role: Role,
    status: AccountStatus,
) -> i64 {
    let password_hash = match password {
        Some(password) => hash_password(password, 4).await.expect("hash password"),
        None => "not-a-bcrypt-hash".to_string(),
    };
    let name = email
        .split('@')
        .next()
        .unwrap_or("member")
        .replace(['.', '_'], " ");
    let now = ManualClock::default().now();

    sqlx::query(
        "INSERT INTO users (name, email, password_hash, role, account_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
    )
    .bind(name)
    .bind(email.to_lowercase())
    .bind(password_hash)
    .bind(role)
    .bind(status)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert user")
    .last_insert_rowid()
}

#[derive(Debug)]
struct ClockState {
    base: DateTime<Utc>,
    ticking_since: Option<Instant>,
}

/// Clock under test control
///
/// The default clock is frozen and only moves through [`advance`] or
/// [`set`]. A ticking clock also follows real elapsed time, for code that
/// sleeps on tokio timers.
///
/// [`advance`]: ManualClock::advance
/// [`set`]: ManualClock::set
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ClockState>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let base = Utc
            .with_ymd_and_hms(2025, 3, 14, 9, 0, 0)
            .single()
            .expect("valid base time");
        Self::frozen(base)
    }
}

impl ManualClock {
    pub fn frozen(at: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ClockState {
                base: at,
                ticking_since: None,
            }),
        }
    }

    pub fn ticking(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ClockState {
                base: start,
                ticking_since: Some(Instant::now()),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn advance(&self, by: Duration) {
        self.lock().base += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut state = self.lock();
        state.base = at;
        if state.ticking_since.is_some() {
            state.ticking_since = Some(Instant::now());
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let state = self.lock();
        match state.ticking_since {
            Some(since) => {
                state.base + Duration::from_std(since.elapsed()).unwrap_or_else(|_| Duration::zero())
            }
            None => state.base,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Activation,
    Otp,
    Reset,
}

/// A message the recording mailer was asked to send
#[derive(Debug, Clone)]
pub struct SentMail {
    pub kind: MailKind,
    pub to: String,
    pub name: String,
    /// Link or code carried by the message
    pub payload: String,
}

/// Mailer that keeps every message in memory
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    fail: AtomicBool,
}

fn token_from_link(link: &str) -> Option<String> {
    let (_, query) = link.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .and_then(|raw| urlencoding::decode(raw).ok())
        .map(|token| token.into_owned())
}

impl RecordingMailer {
    /// Make every following send fail with a mail error
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn last(&self, kind: MailKind, to: &str) -> Option<SentMail> {
        self.sent()
            .into_iter()
            .rev()
            .find(|mail| mail.kind == kind && mail.to.eq_ignore_ascii_case(to))
    }

    pub fn last_activation_token(&self, to: &str) -> Option<String> {
        self.last(MailKind::Activation, to)
            .and_then(|mail| token_from_link(&mail.payload))
    }

    pub fn last_otp(&self, to: &str) -> Option<String> {
        self.last(MailKind::Otp, to).map(|mail| mail.payload)
    }

    pub fn last_reset_token(&self, to: &str) -> Option<String> {
        self.last(MailKind::Reset, to)
            .and_then(|mail| token_from_link(&mail.payload))
    }

    pub fn activation_count(&self, to: &str) -> usize {
        self.sent()
            .iter()
            .filter(|mail| mail.kind == MailKind::Activation && mail.to.eq_ignore_ascii_case(to))
            .count()
    }

    fn push(&self, kind: MailKind, to: &str, name: &str, payload: &str) -> AppResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Mail("recording mailer set to fail".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(SentMail {
                kind,
                to: to.to_string(),
                name: name.to_string(),
                payload: payload.to_string(),
            });
        Ok(())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_activation_email(&self, to: &str, name: &str, link: &str) -> AppResult<()> {
        self.push(MailKind::Activation, to, name, link)
    }

    async fn send_otp_email(&self, to: &str, name: &str, code: &str) -> AppResult<()> {
        self.push(MailKind::Otp, to, name, code)
    }

    async fn send_reset_password_email(&self, to: &str, name: &str, link: &str) -> AppResult<()> {
        self.push(MailKind::Reset, to, name, link)
    }
}

/// Audit sink that keeps events in memory
#[derive(Debug, Default)]
pub struct RecordingSecurityLog {
    events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingSecurityLog {
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.events().iter().any(|event| event.action == action)
    }
}

#[async_trait]
impl SecurityLog for RecordingSecurityLog {
    async fn record(&self, event: SecurityEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

/// CAPTCHA gate with a switchable verdict
#[derive(Debug)]
pub struct StaticCaptcha {
    accept: AtomicBool,
}

impl Default for StaticCaptcha {
    fn default() -> Self {
        Self {
            accept: AtomicBool::new(true),
        }
    }
}

impl StaticCaptcha {
    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaptchaVerifier for StaticCaptcha {
    async fn verify(&self, _token: Option<&str>, _remote_ip: &str) -> AppResult<()> {
        if self.accept.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Validation("CAPTCHA verification failed".to_string()))
        }
    }
}

/// Fully wired services over an in-memory database
pub struct Harness {
    pub ctx: AppContext,
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub accounts: Arc<AccountManager>,
    pub sessions: Arc<SessionRegistry>,
    pub otps: Arc<OtpLedger>,
    pub auth: Arc<AuthService>,
    pub mailer: Arc<RecordingMailer>,
    pub audit: Arc<RecordingSecurityLog>,
    pub captcha: Arc<StaticCaptcha>,
}

pub async fn harness() -> Harness {
    harness_with(test_config(), Arc::new(ManualClock::default())).await
}

pub async fn harness_with(config: ServerConfig, clock: Arc<ManualClock>) -> Harness {
    let pool = memory_pool().await;
    let mailer = Arc::new(RecordingMailer::default());
    let audit = Arc::new(RecordingSecurityLog::default());
    let captcha = Arc::new(StaticCaptcha::default());

    let ctx = AppContext::assemble(
        config,
        pool.clone(),
        clock.clone(),
        mailer.clone(),
        audit.clone(),
        captcha.clone(),
    );

    Harness {
        pool,
        clock,
        accounts: ctx.accounts.clone(),
        sessions: ctx.sessions.clone(),
        otps: ctx.otps.clone(),
        auth: ctx.auth.clone(),
        mailer,
        audit,
        captcha,
        ctx,
    }
}
