/// Row models for the Clubhouse database
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Lifecycle state of a member account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Inactive,
    Active,
    Locked,
    Deleted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Active => "active",
            AccountStatus::Locked => "locked",
            AccountStatus::Deleted => "deleted",
        }
    }

    /// Statuses allowed to hold a session
    pub fn can_sign_in(&self) -> bool {
        matches!(self, AccountStatus::Inactive | AccountStatus::Active)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }
}

/// User record in the database
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub account_status: AccountStatus,
    pub member_type: Option<String>,
    pub contact: Option<String>,
    pub address: Option<String>,
    pub organization: Option<String>,
    pub image_path: Option<String>,
    pub committee_role: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a user that may be shown to the user themselves or to admins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub account_status: AccountStatus,
    pub member_type: Option<String>,
    pub contact: Option<String>,
    pub address: Option<String>,
    pub organization: Option<String>,
    pub image_path: Option<String>,
    pub committee_role: Option<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            account_status: user.account_status,
            member_type: user.member_type.clone(),
            contact: user.contact.clone(),
            address: user.address.clone(),
            organization: user.organization.clone(),
            image_path: user.image_path.clone(),
            committee_role: user.committee_role.clone(),
        }
    }
}

/// One-time activation token
#[derive(Debug, Clone, FromRow)]
pub struct ActivationToken {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

/// Pending login code for an email
#[derive(Debug, Clone, FromRow)]
pub struct LoginOtp {
    pub email: String,
    pub otp: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Stored session; the raw token is never persisted
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub token_hash: String,
    pub user_id: i64,
    pub role: Role,
    pub ip: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Persisted committee snapshot
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub data: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

/// Persisted security event
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityLogRow {
    pub id: i64,
    pub category: String,
    pub action: String,
    pub status: String,
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub details: Option<String>,
    pub ref_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub severity: String,
    pub created_at: DateTime<Utc>,
}
