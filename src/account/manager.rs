/// Account manager implementation using runtime queries
use crate::{
    account::{NewAccount, ProfileUpdate},
    clock::Clock,
    db::models::{AccountStatus, ActivationToken, PublicUser, User},
    error::AppResult,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, account_status, member_type, \
     contact, address, organization, image_path, committee_role, created_at, updated_at";

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Look up a user by email, in any status
    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = ?1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    /// Look up a user by id
    pub async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = ?1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    /// Public fields of a user
    pub async fn public_profile(&self, id: i64) -> AppResult<Option<PublicUser>> {
        Ok(self.get_user(id).await?.as_ref().map(PublicUser::from))
    }

    /// Insert a new account in `pending` status
    pub async fn insert_pending(&self, account: &NewAccount) -> AppResult<i64> {
        let now = self.clock.now();
        let result = sqlx::query(
            "INSERT INTO users (name, email, password_hash, role, account_status, member_type,
                                contact, address, organization, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'member', 'pending', ?4, ?5, ?6, ?7, ?8, ?8)",
        )
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.member_type)
        .bind(&account.contact)
        .bind(&account.address)
        .bind(&account.organization)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrite a soft-deleted account in place and return it to `pending`
    ///
    /// Returns false when the row is not in `deleted` status.
    pub async fn reactivate_deleted(&self, id: i64, account: &NewAccount) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET name = ?1, password_hash = ?2, member_type = ?3, contact = ?4, address = ?5,
                 organization = ?6, role = 'member', account_status = 'pending',
                 committee_role = NULL, image_path = NULL, updated_at = ?7
             WHERE id = ?8 AND account_status = 'deleted'",
        )
        .bind(&account.name)
        .bind(&account.password_hash)
        .bind(&account.member_type)
        .bind(&account.contact)
        .bind(&account.address)
        .bind(&account.organization)
        .bind(self.clock.now())
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a `pending` account to `inactive`
    pub async fn activate_pending(&self, id: i64) -> AppResult<bool> {
        self.transition(id, &[AccountStatus::Pending], AccountStatus::Inactive)
            .await
    }

    /// Unconditionally set an account status
    pub async fn set_status(&self, id: i64, status: AccountStatus) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET account_status = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(status)
        .bind(self.clock.now())
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Set an account status only if it is currently one of `from`
    pub async fn transition(
        &self,
        id: i64,
        from: &[AccountStatus],
        to: AccountStatus,
    ) -> AppResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = (0..from.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE users SET account_status = ?1, updated_at = ?2
             WHERE id = ?3 AND account_status IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(to).bind(self.clock.now()).bind(id);
        for status in from {
            query = query.bind(*status);
        }
        let result = query.execute(&self.db).await?;

        Ok(result.rows_affected() == 1)
    }

    /// Replace a password hash
    pub async fn update_password(&self, id: i64, password_hash: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(password_hash)
        .bind(self.clock.now())
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Update member-editable profile fields; absent fields keep their value
    pub async fn update_profile(&self, id: i64, update: &ProfileUpdate) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET contact = COALESCE(?1, contact),
                 address = COALESCE(?2, address),
                 organization = COALESCE(?3, organization),
                 updated_at = ?4
             WHERE id = ?5",
        )
        .bind(&update.contact)
        .bind(&update.address)
        .bind(&update.organization)
        .bind(self.clock.now())
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// List users for the admin back office, newest first
    pub async fn list_users(
        &self,
        search: Option<&str>,
        status: Option<AccountStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<PublicUser>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users
             WHERE (?1 IS NULL OR name LIKE ?1 OR email LIKE ?1)
               AND (?2 IS NULL OR account_status = ?2)
             ORDER BY id DESC
             LIMIT ?3 OFFSET ?4",
            USER_COLUMNS
        ))
        .bind(pattern)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(users.iter().map(PublicUser::from).collect())
    }

    /// Users currently holding a committee role
    pub async fn committee_roster(&self) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users
             WHERE committee_role IS NOT NULL AND account_status != 'deleted'
             ORDER BY name COLLATE NOCASE, id",
            USER_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(users)
    }

    /// Candidate members for committee assignment
    pub async fn search_members(&self, search: &str, limit: i64) -> AppResult<Vec<User>> {
        let pattern = format!("%{}%", search.trim());
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users
             WHERE account_status IN ('inactive', 'active')
               AND (name LIKE ?1 OR email LIKE ?1)
             ORDER BY name COLLATE NOCASE, id
             LIMIT ?2",
            USER_COLUMNS
        ))
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(users)
    }

    /// Assign or clear a committee role
    pub async fn set_committee_role(&self, id: i64, role: Option<&str>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET committee_role = ?1, updated_at = ?2
             WHERE id = ?3 AND account_status != 'deleted'",
        )
        .bind(role)
        .bind(self.clock.now())
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Clear a committee role from whoever currently holds it
    pub async fn vacate_committee_role(&self, role: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE users SET committee_role = NULL, updated_at = ?1 WHERE committee_role = ?2",
        )
        .bind(self.clock.now())
        .bind(role)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Store a new activation token
    pub async fn create_activation_token(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO activation_tokens (user_id, token, expires_at, used, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .bind(self.clock.now())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Look up an activation token
    pub async fn find_activation_token(&self, token: &str) -> AppResult<Option<ActivationToken>> {
        let row = sqlx::query_as::<_, ActivationToken>(
            "SELECT id, user_id, token, expires_at, used, created_at
             FROM activation_tokens WHERE token = ?1",
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?;

        Ok(row)
    }

    /// Flag an activation token as redeemed
    pub async fn mark_activation_token_used(&self, id: i64) -> AppResult<()> {
        sqlx::query("UPDATE activation_tokens SET used = 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}
