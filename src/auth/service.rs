/// Authentication state machine
///
/// Signup, activation, password + OTP login, refresh, logout and password
/// reset, orchestrated over the credential store, OTP ledger and session
/// registry. Expected business failures come back as typed `AppError`s;
/// email and audit side effects are best effort except the login code.
use crate::{
    account::{normalize_email, AccountManager, NewAccount},
    audit::{Category, SecurityEvent, SecurityLog, Severity},
    auth::{
        extract::ClientInfo,
        forms::{self, SignupRequest},
        otp::OtpLedger,
        password::{hash_password, verify_password},
        reset::{invalid_reset_token, ResetTokens},
        session::{Session, SessionRegistry},
    },
    clock::Clock,
    config::{AuthPolicy, ServerConfig},
    db::models::{AccountStatus, PublicUser, User},
    error::{trace_reference, AppError, AppResult},
    mailer::Mailer,
    metrics,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::sync::Arc;

/// Result of a completed login
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub session: Session,
    pub user: PublicUser,
}

fn trace_id(prefix: &str) -> String {
    format!("{}-{}", prefix, trace_reference())
}

fn activation_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Orchestrates the authentication lifecycle
pub struct AuthService {
    accounts: Arc<AccountManager>,
    sessions: Arc<SessionRegistry>,
    otps: Arc<OtpLedger>,
    resets: ResetTokens,
    mailer: Arc<dyn Mailer>,
    audit: Arc<dyn SecurityLog>,
    clock: Arc<dyn Clock>,
    policy: AuthPolicy,
    bcrypt_cost: u32,
    frontend_base_url: String,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<AccountManager>,
        sessions: Arc<SessionRegistry>,
        otps: Arc<OtpLedger>,
        mailer: Arc<dyn Mailer>,
        audit: Arc<dyn SecurityLog>,
        clock: Arc<dyn Clock>,
        policy: AuthPolicy,
        config: &ServerConfig,
    ) -> Self {
        let resets = ResetTokens::new(
            config.authentication.reset_password_secret.clone(),
            policy.reset_token_ttl,
            clock.clone(),
        );

        Self {
            accounts,
            sessions,
            otps,
            resets,
            mailer,
            audit,
            clock,
            policy,
            bcrypt_cost: config.authentication.bcrypt_cost,
            frontend_base_url: config.service.frontend_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Create or reactivate a pending account and mail its activation link
    ///
    /// Succeeds without side effects for an email held by a live account.
    pub async fn signup(&self, form: SignupRequest, client: &ClientInfo) -> AppResult<()> {
        forms::check(&form)?;

        let trace = trace_id("SIGNUP");
        let email = normalize_email(&form.email);
        let event = |action: &str, status: &str| {
            SecurityEvent::new(Category::Auth, action, status)
                .email(email.clone())
                .reference(trace.clone())
                .client(&client.ip, client.user_agent.as_deref())
        };

        let existing = self.accounts.find_by_email(&email).await?;
        if let Some(ref user) = existing {
            if user.account_status != AccountStatus::Deleted {
                tracing::info!(trace = %trace, "Signup for existing account ignored");
                metrics::record_signup("duplicate");
                self.audit
                    .record(event("SIGNUP_DUPLICATE", "ignored").user(user.id).severity(Severity::Medium))
                    .await;
                return Ok(());
            }
        }

        let account = NewAccount {
            name: form.name.trim().to_string(),
            email: email.clone(),
            password_hash: hash_password(&form.password, self.bcrypt_cost).await?,
            member_type: form.member_type,
            contact: form.contact,
            address: form.address,
            organization: form.organization,
        };

        let user_id = match existing {
            Some(user) => {
                if !self.accounts.reactivate_deleted(user.id, &account).await? {
                    tracing::info!(trace = %trace, "Deleted account changed status during signup");
                    return Ok(());
                }
                metrics::record_signup("reactivated");
                self.audit.record(event("SIGNUP_REACTIVATED", "success").user(user.id)).await;
                user.id
            }
            None => match self.accounts.insert_pending(&account).await {
                Ok(id) => {
                    metrics::record_signup("created");
                    self.audit.record(event("SIGNUP", "success").user(id)).await;
                    id
                }
                Err(AppError::Database(sqlx::Error::Database(e))) if e.is_unique_violation() => {
                    tracing::info!(trace = %trace, "Concurrent signup for the same email ignored");
                    metrics::record_signup("duplicate");
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
        };

        let token = activation_token();
        let expires_at = self.clock.now() + self.policy.activation_ttl;
        self.accounts
            .create_activation_token(user_id, &token, expires_at)
            .await?;

        let link = format!(
            "{}/activate?token={}",
            self.frontend_base_url,
            urlencoding::encode(&token)
        );
        if let Err(e) = self
            .mailer
            .send_activation_email(&email, &account.name, &link)
            .await
        {
            tracing::error!(trace = %trace, "Failed to send activation email: {}", e);
            self.audit
                .record(
                    event("ACTIVATION_EMAIL", "failure")
                        .user(user_id)
                        .details(e.to_string())
                        .severity(Severity::Medium),
                )
                .await;
        }

        Ok(())
    }

    /// Redeem an activation token
    pub async fn activate(&self, token: Option<&str>) -> AppResult<()> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::InvalidToken)?;

        let record = self
            .accounts
            .find_activation_token(token)
            .await?
            .ok_or(AppError::InvalidToken)?;

        if record.used {
            return Err(AppError::TokenAlreadyUsed);
        }
        if self.clock.now() > record.expires_at {
            return Err(AppError::TokenExpired);
        }

        let activated = self.accounts.activate_pending(record.user_id).await?;
        self.accounts.mark_activation_token_used(record.id).await?;

        tracing::info!(user_id = record.user_id, activated, "Activation token redeemed");
        self.audit
            .record(
                SecurityEvent::new(Category::Auth, "ACTIVATE", "success")
                    .user(record.user_id)
                    .details(if activated { "pending -> inactive" } else { "status unchanged" }),
            )
            .await;

        Ok(())
    }

    /// Check a password and mail a login code
    pub async fn login_request(&self, email: &str, password: &str, client: &ClientInfo) -> AppResult<()> {
        let trace = trace_id("LOGIN");
        let email = normalize_email(email);
        let event = |status: &str| {
            SecurityEvent::new(Category::Auth, "LOGIN_REQUEST", status)
                .email(email.clone())
                .reference(trace.clone())
                .client(&client.ip, client.user_agent.as_deref())
        };

        let user = self.accounts.find_by_email(&email).await?;

        if let Some(ref user) = user {
            if user.account_status == AccountStatus::Locked {
                self.record_attempt(&email, client, false).await?;
                metrics::record_login_request("locked");
                self.audit.record(event("locked").user(user.id).severity(Severity::Medium)).await;
                return Err(AppError::AccountLocked);
            }
        }

        let verified = match user {
            Some(ref user) if user.account_status.can_sign_in() => {
                verify_password(password, &user.password_hash).await?
            }
            _ => false,
        };

        let user = match (verified, user) {
            (true, Some(user)) => user,
            (_, user) => return self.login_failure(&email, user, client, &trace).await,
        };

        self.record_attempt(&email, client, true).await?;

        let code = self.otps.issue_otp(&email, self.policy.otp_ttl).await?;
        if let Err(e) = self.mailer.send_otp_email(&email, &user.name, &code).await {
            tracing::error!(trace = %trace, "Failed to send OTP email: {}", e);
            self.audit
                .record(event("otp_email_failed").user(user.id).details(e.to_string()).severity(Severity::High))
                .await;
            return Err(e);
        }

        metrics::record_login_request("otp_sent");
        self.audit.record(event("otp_sent").user(user.id)).await;
        Ok(())
    }

    async fn record_attempt(&self, email: &str, client: &ClientInfo, success: bool) -> AppResult<()> {
        self.otps
            .record_login_attempt(email, &client.ip, client.user_agent.as_deref(), success)
            .await
    }

    async fn login_failure(
        &self,
        email: &str,
        user: Option<User>,
        client: &ClientInfo,
        trace: &str,
    ) -> AppResult<()> {
        self.record_attempt(email, client, false).await?;

        let failures = self
            .otps
            .count_login_failures(email, self.policy.lockout_window)
            .await?;

        let event = SecurityEvent::new(Category::Auth, "LOGIN_REQUEST", "invalid")
            .email(email)
            .reference(trace)
            .client(&client.ip, client.user_agent.as_deref());

        if failures < self.policy.lockout_threshold {
            metrics::record_login_request("invalid");
            self.audit
                .record(event.details(format!("{} recent failures", failures)))
                .await;
            return Err(AppError::InvalidCredentials);
        }

        if let Some(user) = user {
            let locked = self
                .accounts
                .transition(
                    user.id,
                    &[AccountStatus::Inactive, AccountStatus::Active],
                    AccountStatus::Locked,
                )
                .await?;
            if locked {
                self.sessions.revoke_all_for_user(user.id).await?;
                metrics::record_lockout();
                tracing::warn!(user_id = user.id, "Account locked after {} failed logins", failures);
                self.audit
                    .record(
                        SecurityEvent::new(Category::Auth, "ACCOUNT_LOCKED", "locked")
                            .user(user.id)
                            .email(email)
                            .reference(trace)
                            .client(&client.ip, client.user_agent.as_deref())
                            .severity(Severity::High),
                    )
                    .await;
            }
        }

        metrics::record_login_request("locked");
        Err(AppError::AccountLocked)
    }

    /// Redeem a login code and issue a session
    pub async fn login_verify(&self, email: &str, otp: &str, client: &ClientInfo) -> AppResult<LoginSuccess> {
        let trace = trace_id("OTP");
        let email = normalize_email(email);
        let event = |status: &str| {
            SecurityEvent::new(Category::Auth, "VERIFY_OTP", status)
                .email(email.clone())
                .reference(trace.clone())
                .client(&client.ip, client.user_agent.as_deref())
        };

        let failures = self
            .otps
            .count_recent_failures(&email, &client.ip, self.policy.otp_attempt_window)
            .await?;
        if failures >= self.policy.otp_attempt_limit {
            metrics::record_otp_verification("rate_limited");
            self.audit.record(event("rate_limited").severity(Severity::High)).await;
            return Err(AppError::RateLimited(
                "Too many OTP attempts. Please try again later.".to_string(),
            ));
        }

        if !self.otps.verify_otp(&email, otp).await? {
            self.otps.record_otp_failure(&email, &client.ip).await?;
            metrics::record_otp_verification("invalid");
            self.audit.record(event("invalid").severity(Severity::Medium)).await;
            return Err(AppError::InvalidOrExpiredOtp);
        }

        let user = match self.accounts.find_by_email(&email).await? {
            Some(user) if user.account_status.can_sign_in() => user,
            other => {
                metrics::record_otp_verification("not_permitted");
                let mut denied = event("not_permitted").severity(Severity::Medium);
                if let Some(user) = other {
                    denied = denied.user(user.id).details(user.account_status.to_string());
                }
                self.audit.record(denied).await;
                return Err(AppError::AccountNotPermitted);
            }
        };

        let session = self
            .sessions
            .issue(user.id, user.role, &client.ip, client.user_agent.as_deref())
            .await?;
        self.otps.consume_otp(&email).await?;
        self.otps.clear_attempts(&email, &client.ip).await?;

        metrics::record_otp_verification("success");
        metrics::record_session_issued();
        tracing::info!(user_id = user.id, "Session issued");
        self.audit.record(event("success").user(user.id)).await;
        self.audit
            .record(
                SecurityEvent::new(Category::Session, "SESSION_ISSUED", "success")
                    .user(user.id)
                    .reference(trace.clone())
                    .client(&client.ip, client.user_agent.as_deref()),
            )
            .await;

        Ok(LoginSuccess {
            session,
            user: PublicUser::from(&user),
        })
    }

    /// Resolve a presented token to its live session
    pub async fn authenticate(&self, token: &str) -> AppResult<Session> {
        self.sessions
            .lookup(token)
            .await?
            .ok_or_else(|| AppError::Authentication("Session expired or invalid".to_string()))
    }

    /// Extend a live session by the session TTL without rotating its token
    pub async fn refresh(&self, session: &Session) -> AppResult<DateTime<Utc>> {
        self.sessions
            .extend(&session.token, self.policy.session_ttl)
            .await?
            .ok_or_else(|| AppError::Authentication("Session expired or invalid".to_string()))
    }

    /// Revoke a session; never fails
    pub async fn logout(&self, token: Option<&str>, client: &ClientInfo) {
        let Some(token) = token else {
            return;
        };

        let user_id = match self.sessions.lookup(token).await {
            Ok(session) => session.map(|s| s.user_id),
            Err(_) => None,
        };

        if let Err(e) = self.sessions.revoke(token).await {
            tracing::error!("Failed to revoke session on logout: {}", e);
            return;
        }

        let mut event = SecurityEvent::new(Category::Session, "LOGOUT", "success")
            .client(&client.ip, client.user_agent.as_deref());
        if let Some(user_id) = user_id {
            event = event.user(user_id);
        }
        self.audit.record(event).await;
    }

    /// Mail a reset link; the response never reveals whether the email exists
    pub async fn request_reset(&self, email: &str, client: &ClientInfo) -> AppResult<()> {
        let trace = trace_id("RESET");
        let email = normalize_email(email);
        let event = |status: &str| {
            SecurityEvent::new(Category::Auth, "PASSWORD_RESET_REQUEST", status)
                .email(email.clone())
                .reference(trace.clone())
                .client(&client.ip, client.user_agent.as_deref())
        };

        let user = match self.accounts.find_by_email(&email).await? {
            Some(user) if user.account_status != AccountStatus::Deleted => user,
            _ => {
                self.audit.record(event("not_found")).await;
                return Ok(());
            }
        };

        let token = self.resets.issue(&email)?;
        let link = format!(
            "{}/resetpassword?token={}",
            self.frontend_base_url,
            urlencoding::encode(&token)
        );

        match self.mailer.send_reset_password_email(&email, &user.name, &link).await {
            Ok(()) => self.audit.record(event("success").user(user.id)).await,
            Err(e) => {
                tracing::error!(trace = %trace, "Failed to send reset email: {}", e);
                self.audit
                    .record(event("error").user(user.id).details(e.to_string()).severity(Severity::Medium))
                    .await;
            }
        }

        Ok(())
    }

    /// Check a reset token without consuming it
    pub fn validate_reset_token(&self, token: &str) -> AppResult<()> {
        self.resets.verify(token).map(|_| ())
    }

    /// Set a new password from a reset token and revoke every session
    pub async fn reset_password(&self, token: &str, password: &str, client: &ClientInfo) -> AppResult<()> {
        let email = self.resets.verify(token)?;

        let user = match self.accounts.find_by_email(&email).await? {
            Some(user) if user.account_status != AccountStatus::Deleted => user,
            _ => return Err(invalid_reset_token()),
        };

        let hash = hash_password(password, self.bcrypt_cost).await?;
        self.accounts.update_password(user.id, &hash).await?;
        self.sessions.revoke_all_for_user(user.id).await?;

        tracing::info!(user_id = user.id, "Password reset");
        self.audit
            .record(
                SecurityEvent::new(Category::Auth, "PASSWORD_RESET", "success")
                    .user(user.id)
                    .email(email)
                    .client(&client.ip, client.user_agent.as_deref())
                    .severity(Severity::Medium),
            )
            .await;

        Ok(())
    }

    /// Change a password after confirming the current one
    pub async fn change_password(&self, user_id: i64, current: &str, new_password: &str) -> AppResult<()> {
        let user = self
            .accounts
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if !verify_password(current, &user.password_hash).await? {
            return Err(AppError::Validation("Current password is incorrect".to_string()));
        }

        let hash = hash_password(new_password, self.bcrypt_cost).await?;
        self.accounts.update_password(user_id, &hash).await?;
        self.audit
            .record(SecurityEvent::new(Category::Auth, "PASSWORD_CHANGE", "success").user(user_id))
            .await;
        Ok(())
    }

    /// Soft-delete the caller's own account after a password check
    pub async fn delete_account(&self, user_id: i64, password: &str, client: &ClientInfo) -> AppResult<()> {
        let user = self
            .accounts
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if !verify_password(password, &user.password_hash).await? {
            return Err(AppError::InvalidCredentials);
        }

        let deleted = self
            .accounts
            .transition(
                user_id,
                &[AccountStatus::Inactive, AccountStatus::Active],
                AccountStatus::Deleted,
            )
            .await?;
        if !deleted {
            return Err(AppError::Authorization(
                "Account cannot be deleted in its current state".to_string(),
            ));
        }

        self.sessions.revoke_all_for_user(user_id).await?;
        self.audit
            .record(
                SecurityEvent::new(Category::Auth, "DELETE_ACCOUNT", "success")
                    .user(user_id)
                    .email(user.email)
                    .client(&client.ip, client.user_agent.as_deref())
                    .severity(Severity::Medium),
            )
            .await;
        Ok(())
    }
}
