/// Member self-service endpoints
use crate::{
    account::ProfileUpdate,
    auth::{extract::clear_session_cookie, forms, AuthSession, ClientInfo},
    context::AppContext,
    error::{AppError, AppResult},
};
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

/// Build member routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/user/profile", get(profile))
        .route("/api/user/update-profile", post(update_profile))
        .route("/api/user/delete-account", post(delete_account))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    #[validate(length(max = 100, message = "Contact is too long"))]
    contact: Option<String>,
    #[validate(length(max = 255, message = "Address is too long"))]
    address: Option<String>,
    #[validate(length(max = 100, message = "Organization is too long"))]
    organization: Option<String>,
    current_password: Option<String>,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteAccountRequest {
    password: String,
}

async fn profile(
    State(ctx): State<AppContext>,
    auth: AuthSession,
) -> AppResult<Json<serde_json::Value>> {
    let user = ctx
        .accounts
        .public_profile(auth.session.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(json!({ "user": user })))
}

/// Update contact details, optionally changing the password
async fn update_profile(
    State(ctx): State<AppContext>,
    auth: AuthSession,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<serde_json::Value>> {
    forms::check(&req)?;
    let user_id = auth.session.user_id;

    if let Some(new_password) = req.new_password.as_deref() {
        let current = req
            .current_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                AppError::Validation("Current password is required to set a new one".to_string())
            })?;
        ctx.auth.change_password(user_id, current, new_password).await?;
    }

    let update = ProfileUpdate {
        contact: req.contact,
        address: req.address,
        organization: req.organization,
    };
    ctx.accounts.update_profile(user_id, &update).await?;

    let user = ctx
        .accounts
        .public_profile(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    tracing::info!(user_id, "Profile updated");
    Ok(Json(json!({ "message": "Profile updated", "user": user })))
}

/// Password-confirmed soft delete; ends every session
async fn delete_account(
    State(ctx): State<AppContext>,
    auth: AuthSession,
    client: ClientInfo,
    Json(req): Json<DeleteAccountRequest>,
) -> AppResult<impl IntoResponse> {
    ctx.auth
        .delete_account(auth.session.user_id, &req.password, &client)
        .await?;

    Ok((
        [(header::SET_COOKIE, clear_session_cookie(ctx.cookie_secure()))],
        Json(json!({ "message": "Account deleted" })),
    ))
}
