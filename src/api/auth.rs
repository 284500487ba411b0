/// /api/auth/* endpoints
use crate::{
    auth::{
        extract::{clear_session_cookie, extract_session_token, session_cookie},
        forms::{
            self, LoginRequest, ResetPasswordRequest, ResetRequest, SignupRequest, TokenRequest,
            VerifyOtpRequest,
        },
        AuthSession, ClientInfo,
    },
    context::AppContext,
    csrf::csrf_cookie,
    error::{AppError, AppResult},
    rate_limit::{limit_auth_routes, limit_login_routes},
};
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

/// Build auth routes
pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    let signup_and_reset = Router::new()
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/reset-request", post(reset_request))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), limit_auth_routes));

    let login = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/verify-otp", post(verify_otp))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), limit_login_routes));

    Router::new()
        .merge(signup_and_reset)
        .merge(login)
        .route("/api/auth/activate", get(activate))
        .route("/api/auth/validate-reset-token", post(validate_reset_token))
        .route("/api/auth/reset-password", post(reset_password))
        .route("/api/auth/me", get(me))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/csrf-token", get(csrf_token))
}

/// Create or reactivate a pending account
async fn signup(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    Json(req): Json<SignupRequest>,
) -> AppResult<impl IntoResponse> {
    ctx.captcha.verify(req.recaptcha_token.as_deref(), &client.ip).await?;
    ctx.auth.signup(req, &client).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Signup successful. Please check your email to activate." })),
    ))
}

#[derive(Debug, Deserialize)]
struct ActivateQuery {
    token: Option<String>,
}

/// Redeem an activation link
async fn activate(
    State(ctx): State<AppContext>,
    Query(query): Query<ActivateQuery>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.auth.activate(query.token.as_deref()).await?;
    Ok(Json(json!({ "message": "Account activated." })))
}

/// Check the password and mail a login code
async fn login(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<serde_json::Value>> {
    forms::check(&req)?;
    ctx.captcha.verify(req.recaptcha_token.as_deref(), &client.ip).await?;
    ctx.auth.login_request(&req.email, &req.password, &client).await?;

    Ok(Json(json!({ "message": "OTP sent to email", "success": true })))
}

/// Redeem a login code and start a session
async fn verify_otp(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    Json(req): Json<VerifyOtpRequest>,
) -> AppResult<impl IntoResponse> {
    forms::check(&req)?;
    let login = ctx.auth.login_verify(&req.email, &req.otp, &client).await?;

    let cookie = session_cookie(
        &login.session.token,
        ctx.auth.policy().session_ttl,
        ctx.cookie_secure(),
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "Login successful", "user": login.user })),
    ))
}

/// Mail a reset link
async fn reset_request(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    Json(req): Json<ResetRequest>,
) -> AppResult<Json<serde_json::Value>> {
    forms::check(&req)?;
    ctx.captcha.verify(req.recaptcha_token.as_deref(), &client.ip).await?;
    ctx.auth.request_reset(&req.email, &client).await?;

    Ok(Json(json!({
        "message": "If an account with this email exists, a reset link has been sent."
    })))
}

async fn validate_reset_token(
    State(ctx): State<AppContext>,
    Json(req): Json<TokenRequest>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.auth.validate_reset_token(&req.token)?;
    Ok(Json(json!({ "valid": true })))
}

async fn reset_password(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    Json(req): Json<ResetPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    forms::check(&req)?;
    ctx.auth.reset_password(&req.token, &req.password, &client).await?;
    Ok(Json(json!({ "success": true, "message": "Password reset successful." })))
}

/// Identity behind the current session
async fn me(
    State(ctx): State<AppContext>,
    auth: AuthSession,
) -> AppResult<Json<serde_json::Value>> {
    let user = ctx
        .accounts
        .public_profile(auth.session.user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("Session expired or invalid".to_string()))?;

    Ok(Json(json!({ "user": user })))
}

/// Push the session expiry out by another TTL
async fn refresh(
    State(ctx): State<AppContext>,
    auth: AuthSession,
) -> AppResult<impl IntoResponse> {
    let expires_at = ctx.auth.refresh(&auth.session).await?;
    let cookie = session_cookie(
        &auth.session.token,
        ctx.auth.policy().session_ttl,
        ctx.cookie_secure(),
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "Session refreshed", "expiresAt": expires_at })),
    ))
}

/// Revoke the session and clear the cookie; always 200
async fn logout(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = extract_session_token(&headers);
    ctx.auth.logout(token.as_deref(), &client).await;

    (
        [(header::SET_COOKIE, clear_session_cookie(ctx.cookie_secure()))],
        Json(json!({ "message": "Logged out successfully." })),
    )
}

/// Issue a double-submit token bound to the session
async fn csrf_token(
    State(ctx): State<AppContext>,
    auth: AuthSession,
) -> AppResult<impl IntoResponse> {
    let token = ctx.csrf.issue(&auth.session.token)?;
    Ok((
        [(header::SET_COOKIE, csrf_cookie(&token, ctx.cookie_secure()))],
        Json(json!({ "csrfToken": token })),
    ))
}
