/// Security audit trail
///
/// Security-relevant events are recorded through the `SecurityLog` capability,
/// which never fails from the caller's perspective: a broken audit store must
/// not mask the outcome of the operation being audited.
use crate::{
    clock::Clock,
    db::models::SecurityLogRow,
    error::AppResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Auth,
    Admin,
    Session,
    Csrf,
    Error,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Auth => "auth",
            Category::Admin => "admin",
            Category::Session => "session",
            Category::Csrf => "csrf",
            Category::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auth" => Some(Category::Auth),
            "admin" => Some(Category::Admin),
            "session" => Some(Category::Session),
            "csrf" => Some(Category::Csrf),
            "error" => Some(Category::Error),
            _ => None,
        }
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityEvent {
    pub category: Category,
    pub action: String,
    pub status: String,
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub details: Option<String>,
    pub ref_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub severity: Severity,
}

impl SecurityEvent {
    pub fn new(category: Category, action: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            category,
            action: action.into(),
            status: status.into(),
            user_id: None,
            email: None,
            details: None,
            ref_id: None,
            ip: None,
            user_agent: None,
            severity: Severity::Low,
        }
    }

    pub fn user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn reference(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn client(mut self, ip: &str, user_agent: Option<&str>) -> Self {
        self.ip = Some(ip.to_string());
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Fire-and-forget audit sink
#[async_trait]
pub trait SecurityLog: Send + Sync {
    /// Record an event; implementations swallow their own failures
    async fn record(&self, event: SecurityEvent);
}

/// Audit sink persisting into `security_logs`
pub struct DbSecurityLog {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

/// Filter for reading the audit trail
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub category: Option<Category>,
    pub before: Option<DateTime<Utc>>,
    pub limit: i64,
}

pub const MAX_LOG_PAGE: i64 = 200;

impl DbSecurityLog {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    async fn insert(&self, event: &SecurityEvent) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO security_logs
                (category, action, status, user_id, email, details, ref_id, ip, user_agent, severity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(event.category.as_str())
        .bind(&event.action)
        .bind(&event.status)
        .bind(event.user_id)
        .bind(&event.email)
        .bind(&event.details)
        .bind(&event.ref_id)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(event.severity.as_str())
        .bind(self.clock.now())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Newest-first page of events
    pub async fn list(&self, query: &LogQuery) -> AppResult<Vec<SecurityLogRow>> {
        let rows = sqlx::query_as::<_, SecurityLogRow>(
            "SELECT id, category, action, status, user_id, email, details, ref_id, ip, user_agent,
                    severity, created_at
             FROM security_logs
             WHERE (?1 IS NULL OR category = ?1)
               AND (?2 IS NULL OR created_at < ?2)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )
        .bind(query.category.map(|c| c.as_str()))
        .bind(query.before)
        .bind(query.limit.clamp(1, MAX_LOG_PAGE))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SecurityLog for DbSecurityLog {
    async fn record(&self, event: SecurityEvent) {
        if let Err(e) = self.insert(&event).await {
            tracing::warn!(
                category = event.category.as_str(),
                action = %event.action,
                "Failed to record security event: {}",
                e
            );
        }
    }
}
