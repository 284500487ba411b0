/// Committee roster, snapshot history and committee administration
use crate::{
    audit::{Category, SecurityEvent},
    auth::{AdminSession, ClientInfo},
    committee::{sanitize::strip_markup, PublicRoster, RosterMember},
    context::AppContext,
    error::{AppError, AppResult},
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

const MEMBER_SEARCH_LIMIT: i64 = 10;

/// Public roster and snapshot history
pub fn public_routes() -> Router<AppContext> {
    Router::new()
        .route("/api/committees", get(live_roster))
        .route("/api/committees/snapshots", get(list_snapshots))
        .route("/api/committees/snapshots/:id", get(get_snapshot))
}

/// Committee administration
pub fn admin_routes() -> Router<AppContext> {
    Router::new()
        .route("/api/admin/committees/members", get(search_members))
        .route(
            "/api/admin/committees/leadership",
            post(assign_role).delete(remove_role),
        )
        .route(
            "/api/admin/committees/settings",
            get(get_settings).post(update_settings),
        )
        .route("/api/admin/committees/snapshots", post(take_snapshot))
}

async fn live_roster(State(ctx): State<AppContext>) -> AppResult<Json<serde_json::Value>> {
    let roster = ctx.snapshots.live_roster().await?;
    Ok(Json(json!(PublicRoster::from(&roster))))
}

async fn list_snapshots(State(ctx): State<AppContext>) -> AppResult<Json<serde_json::Value>> {
    let snapshots = ctx.snapshots.list_snapshots().await?;
    Ok(Json(json!({ "snapshots": snapshots })))
}

async fn get_snapshot(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let id: i64 = id
        .parse()
        .map_err(|_| AppError::Validation("Invalid snapshot id".to_string()))?;
    let snapshot = ctx.snapshots.get_snapshot(id).await?;
    Ok(Json(json!(snapshot)))
}

#[derive(Debug, Deserialize)]
struct MemberSearch {
    #[serde(default)]
    search: String,
}

/// Candidates for a committee seat
async fn search_members(
    State(ctx): State<AppContext>,
    _admin: AdminSession,
    Query(query): Query<MemberSearch>,
) -> AppResult<Json<serde_json::Value>> {
    let users = ctx
        .accounts
        .search_members(&strip_markup(&query.search), MEMBER_SEARCH_LIMIT)
        .await?;
    let members: Vec<RosterMember> = users.iter().map(RosterMember::from).collect();
    Ok(Json(json!({ "members": members })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignRoleRequest {
    role: String,
    member_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveRoleRequest {
    member_id: i64,
}

async fn assign_role(
    State(ctx): State<AppContext>,
    admin: AdminSession,
    client: ClientInfo,
    Json(req): Json<AssignRoleRequest>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.snapshots.assign_role(req.member_id, req.role.trim()).await?;

    ctx.audit
        .record(
            SecurityEvent::new(Category::Admin, "COMMITTEE_ASSIGN", "success")
                .user(req.member_id)
                .details(format!("admin {} assigned {}", admin.session.user_id, req.role.trim()))
                .client(&client.ip, client.user_agent.as_deref()),
        )
        .await;

    let roster = ctx.snapshots.live_roster().await?;
    Ok(Json(json!(roster)))
}

async fn remove_role(
    State(ctx): State<AppContext>,
    admin: AdminSession,
    client: ClientInfo,
    Json(req): Json<RemoveRoleRequest>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.snapshots.clear_role(req.member_id).await?;

    ctx.audit
        .record(
            SecurityEvent::new(Category::Admin, "COMMITTEE_REMOVE", "success")
                .user(req.member_id)
                .details(format!("admin {}", admin.session.user_id))
                .client(&client.ip, client.user_agent.as_deref()),
        )
        .await;

    let roster = ctx.snapshots.live_roster().await?;
    Ok(Json(json!(roster)))
}

async fn get_settings(
    State(ctx): State<AppContext>,
    _admin: AdminSession,
) -> AppResult<Json<serde_json::Value>> {
    let term_years = ctx.snapshots.term_years().await?;
    Ok(Json(json!({
        "termYears": term_years,
        "nextSnapshotAt": ctx.scheduler.next_run(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsRequest {
    term_years: u32,
}

/// Store a new term and re-arm the snapshot timer
async fn update_settings(
    State(ctx): State<AppContext>,
    admin: AdminSession,
    client: ClientInfo,
    Json(req): Json<SettingsRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let next = ctx.scheduler.update_term(req.term_years).await?;

    ctx.audit
        .record(
            SecurityEvent::new(Category::Admin, "COMMITTEE_SETTINGS", "success")
                .details(format!(
                    "admin {} set term to {} years",
                    admin.session.user_id, req.term_years
                ))
                .client(&client.ip, client.user_agent.as_deref()),
        )
        .await;

    Ok(Json(json!({
        "termYears": req.term_years,
        "nextSnapshotAt": next,
    })))
}

/// Manual snapshot trigger
async fn take_snapshot(
    State(ctx): State<AppContext>,
    admin: AdminSession,
    client: ClientInfo,
) -> AppResult<Json<serde_json::Value>> {
    let summary = ctx.scheduler.take_manual().await?;

    ctx.audit
        .record(
            SecurityEvent::new(
                Category::Admin,
                "COMMITTEE_SNAPSHOT",
                if summary.is_some() { "success" } else { "skipped" },
            )
            .details(format!("admin {}", admin.session.user_id))
            .client(&client.ip, client.user_agent.as_deref()),
        )
        .await;

    Ok(Json(json!({
        "snapshot": summary,
        "nextSnapshotAt": ctx.scheduler.next_run(),
    })))
}
