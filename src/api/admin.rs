/// Admin back-office endpoints: member moderation and the audit trail
use crate::{
    audit::{Category, LogQuery, SecurityEvent, Severity},
    auth::{AdminSession, ClientInfo},
    context::AppContext,
    db::models::{AccountStatus, PublicUser},
    error::{AppError, AppResult},
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/users/:id/lock", post(lock_user))
        .route("/api/admin/users/:id/unlock", post(unlock_user))
        .route("/api/admin/users/:id/delete", post(delete_user))
        .route("/api/admin/users/:id/approve", post(approve_user))
        .route("/api/admin/logs", get(list_logs))
}

#[derive(Debug, Deserialize)]
struct ListUsersQuery {
    search: Option<String>,
    status: Option<AccountStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_users(
    State(ctx): State<AppContext>,
    _admin: AdminSession,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = query.offset.unwrap_or(0).max(0);

    let users = ctx
        .accounts
        .list_users(query.search.as_deref(), query.status, limit, offset)
        .await?;

    Ok(Json(json!({ "users": users, "limit": limit, "offset": offset })))
}

/// One moderation transition
struct Moderation {
    action: &'static str,
    from: &'static [AccountStatus],
    to: AccountStatus,
    revoke_sessions: bool,
    reset_failures: bool,
}

const LOCK: Moderation = Moderation {
    action: "ADMIN_LOCK",
    from: &[AccountStatus::Inactive, AccountStatus::Active],
    to: AccountStatus::Locked,
    revoke_sessions: true,
    reset_failures: false,
};

const UNLOCK: Moderation = Moderation {
    action: "ADMIN_UNLOCK",
    from: &[AccountStatus::Locked],
    to: AccountStatus::Active,
    revoke_sessions: false,
    reset_failures: true,
};

const DELETE: Moderation = Moderation {
    action: "ADMIN_DELETE",
    from: &[
        AccountStatus::Pending,
        AccountStatus::Inactive,
        AccountStatus::Active,
        AccountStatus::Locked,
    ],
    to: AccountStatus::Deleted,
    revoke_sessions: true,
    reset_failures: false,
};

const APPROVE: Moderation = Moderation {
    action: "ADMIN_APPROVE",
    from: &[AccountStatus::Inactive],
    to: AccountStatus::Active,
    revoke_sessions: false,
    reset_failures: false,
};

async fn moderate(
    ctx: &AppContext,
    admin: &AdminSession,
    client: &ClientInfo,
    target_id: i64,
    moderation: &Moderation,
) -> AppResult<PublicUser> {
    if target_id == admin.session.user_id && moderation.revoke_sessions {
        return Err(AppError::Validation(
            "Admins cannot lock or delete their own account".to_string(),
        ));
    }

    let target = ctx
        .accounts
        .get_user(target_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let moved = ctx
        .accounts
        .transition(target_id, moderation.from, moderation.to)
        .await?;

    let event = SecurityEvent::new(Category::Admin, moderation.action, if moved { "success" } else { "rejected" })
        .user(target_id)
        .email(target.email.clone())
        .client(&client.ip, client.user_agent.as_deref())
        .severity(Severity::Medium);

    if !moved {
        ctx.audit
            .record(event.details(format!(
                "admin {} could not move {} to {}",
                admin.session.user_id, target.account_status, moderation.to
            )))
            .await;
        return Err(AppError::Conflict(format!(
            "Account is {} and cannot be changed to {}",
            target.account_status, moderation.to
        )));
    }

    if moderation.revoke_sessions {
        ctx.sessions.revoke_all_for_user(target_id).await?;
    }
    if moderation.reset_failures {
        ctx.otps.reset_login_failures(&target.email, &client.ip).await?;
    }

    tracing::info!(
        admin_id = admin.session.user_id,
        target_id,
        action = moderation.action,
        "Account moderated"
    );
    ctx.audit
        .record(event.details(format!(
            "admin {}: {} -> {}",
            admin.session.user_id, target.account_status, moderation.to
        )))
        .await;

    ctx.accounts
        .public_profile(target_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

async fn lock_user(
    State(ctx): State<AppContext>,
    admin: AdminSession,
    client: ClientInfo,
    Path(id): Path<i64>,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(moderate(&ctx, &admin, &client, id, &LOCK).await?))
}

async fn unlock_user(
    State(ctx): State<AppContext>,
    admin: AdminSession,
    client: ClientInfo,
    Path(id): Path<i64>,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(moderate(&ctx, &admin, &client, id, &UNLOCK).await?))
}

async fn delete_user(
    State(ctx): State<AppContext>,
    admin: AdminSession,
    client: ClientInfo,
    Path(id): Path<i64>,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(moderate(&ctx, &admin, &client, id, &DELETE).await?))
}

async fn approve_user(
    State(ctx): State<AppContext>,
    admin: AdminSession,
    client: ClientInfo,
    Path(id): Path<i64>,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(moderate(&ctx, &admin, &client, id, &APPROVE).await?))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    category: Option<String>,
    before: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

/// Newest-first audit events
async fn list_logs(
    State(ctx): State<AppContext>,
    _admin: AdminSession,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let category = match query.category.as_deref().filter(|c| !c.is_empty()) {
        Some(raw) => Some(
            Category::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("Unknown log category: {}", raw)))?,
        ),
        None => None,
    };

    let logs = ctx
        .audit_log
        .list(&LogQuery {
            category,
            before: query.before,
            limit: query.limit.unwrap_or(DEFAULT_PAGE),
        })
        .await?;

    Ok(Json(json!({ "logs": logs })))
}
