/// Application context and dependency injection
use crate::{
    account::AccountManager,
    audit::{DbSecurityLog, SecurityLog},
    auth::{AuthService, OtpLedger, SessionRegistry},
    captcha::{self, CaptchaVerifier},
    clock::{Clock, SystemClock},
    committee::{SnapshotEngine, SnapshotScheduler},
    config::{AuthPolicy, ServerConfig},
    csrf::CsrfTokens,
    db,
    error::AppResult,
    mailer::{Mailer, SmtpMailer},
    rate_limit::RouteLimiters,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub clock: Arc<dyn Clock>,
    pub accounts: Arc<AccountManager>,
    pub sessions: Arc<SessionRegistry>,
    pub otps: Arc<OtpLedger>,
    pub auth: Arc<AuthService>,
    // Audit sink, and the reader behind the admin log view
    pub audit: Arc<dyn SecurityLog>,
    pub audit_log: Arc<DbSecurityLog>,
    pub mailer: Arc<dyn Mailer>,
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub csrf: CsrfTokens,
    pub limiters: RouteLimiters,
    pub snapshots: Arc<SnapshotEngine>,
    pub scheduler: Arc<SnapshotScheduler>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AppResult<Self> {
        // Validate configuration
        config.validate()?;

        let db = db::create_pool(&config.storage.database_path, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let audit: Arc<dyn SecurityLog> = Arc::new(DbSecurityLog::new(db.clone(), clock.clone()));

        let mailer = SmtpMailer::new(config.email.clone())?;
        if !mailer.is_configured() {
            tracing::warn!("Email is not configured; activation, login and reset emails will be skipped");
        }

        let captcha = captcha::from_config(config.captcha.clone())?;

        Ok(Self::assemble(config, db, clock, Arc::new(mailer), audit, captcha))
    }

    /// Wire services over an existing pool and capabilities
    pub fn assemble(
        config: ServerConfig,
        db: SqlitePool,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn Mailer>,
        audit: Arc<dyn SecurityLog>,
        captcha: Arc<dyn CaptchaVerifier>,
    ) -> Self {
        let policy = AuthPolicy::default();

        let accounts = Arc::new(AccountManager::new(db.clone(), clock.clone()));
        let sessions = Arc::new(SessionRegistry::new(db.clone(), clock.clone(), policy.session_ttl));
        let otps = Arc::new(OtpLedger::new(db.clone(), clock.clone()));

        let auth = Arc::new(AuthService::new(
            accounts.clone(),
            sessions.clone(),
            otps.clone(),
            mailer.clone(),
            audit.clone(),
            clock.clone(),
            policy,
            &config,
        ));

        let snapshots = Arc::new(SnapshotEngine::new(
            db.clone(),
            accounts.clone(),
            clock.clone(),
            config.committee.default_term_years,
        ));
        let scheduler = SnapshotScheduler::new(snapshots.clone(), clock.clone());

        Self {
            audit_log: Arc::new(DbSecurityLog::new(db.clone(), clock.clone())),
            csrf: CsrfTokens::new(config.authentication.csrf_secret.clone()),
            limiters: RouteLimiters::new(&config.rate_limit),
            config: Arc::new(config),
            db,
            clock,
            accounts,
            sessions,
            otps,
            auth,
            audit,
            mailer,
            captcha,
            snapshots,
            scheduler,
        }
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }

    pub fn cookie_secure(&self) -> bool {
        self.config.authentication.cookie_secure
    }
}
