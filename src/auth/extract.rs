/// Authentication extractors and cookie helpers
use crate::{
    auth::session::Session,
    context::AppContext,
    db::models::Role,
    error::AppError,
};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use axum_extra::headers::{Cookie, HeaderMapExt, UserAgent};
use chrono::Duration;
use std::{convert::Infallible, net::SocketAddr};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "auth_token";

/// Caller network identity used by the attempt ledgers and audit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip: &str, user_agent: Option<&str>) -> Self {
        Self {
            ip: ip.to_string(),
            user_agent: user_agent.map(str::to_string),
        }
    }
}

impl ClientInfo {
    /// Read the caller identity from request parts. `X-Forwarded-For` is
    /// only honoured behind a trusted proxy; otherwise the peer address wins.
    pub fn from_parts(parts: &Parts, trust_proxy: bool) -> Self {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .filter(|_| trust_proxy)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let ip = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        let user_agent = parts
            .headers
            .typed_get::<UserAgent>()
            .map(|ua| ua.as_str().to_string());

        ClientInfo { ip, user_agent }
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientInfo::from_parts(parts, ctx.config.service.trust_proxy))
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Session token from the bearer header, falling back to the session cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    extract_bearer_token(headers).or_else(|| {
        headers
            .typed_get::<Cookie>()
            .and_then(|cookie| cookie.get(SESSION_COOKIE).map(str::to_string))
            .filter(|s| !s.is_empty())
    })
}

/// `Set-Cookie` value carrying a session token
pub fn session_cookie(token: &str, max_age: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        max_age.num_seconds()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value removing the session cookie
pub fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE);
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Authenticated context - resolves the presented token to a live session
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub session: Session,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_session_token(&parts.headers)
            .ok_or_else(|| AppError::Authentication("Not authenticated".to_string()))?;

        let session = state.auth.authenticate(&token).await?;
        Ok(AuthSession { session })
    }
}

/// Admin authentication context - requires the admin role
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub session: Session,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let AuthSession { session } = AuthSession::from_request_parts(parts, state).await?;

        if session.role != Role::Admin {
            tracing::warn!(user_id = session.user_id, "Admin route refused for non-admin");
            return Err(AppError::Authorization("Admin role required".to_string()));
        }

        Ok(AdminSession { session })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn client_info(request: Request<()>, trust_proxy: bool) -> ClientInfo {
        let (parts, _) = request.into_parts();
        ClientInfo::from_parts(&parts, trust_proxy)
    }

    fn forwarded_request() -> Request<()> {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .header("user-agent", "watcher/1.0")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 4000))));
        request
    }

    #[test]
    fn test_client_info_behind_trusted_proxy() {
        let info = client_info(forwarded_request(), true);
        assert_eq!(info.ip, "203.0.113.9");
        assert_eq!(info.user_agent.as_deref(), Some("watcher/1.0"));
    }

    #[test]
    fn test_client_info_ignores_forwarded_for_without_proxy() {
        let info = client_info(forwarded_request(), false);
        assert_eq!(info.ip, "192.0.2.7");
        assert_eq!(info.user_agent.as_deref(), Some("watcher/1.0"));
    }

    #[test]
    fn test_client_info_falls_back() {
        let request = Request::builder().body(()).unwrap();
        assert_eq!(client_info(request, true).ip, "unknown");

        let mut request = Request::builder().body(()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 4000))));
        assert_eq!(client_info(request, true).ip, "192.0.2.7");
    }

    #[test]
    fn test_session_token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_session_token(&headers), None);

        headers.insert("cookie", HeaderValue::from_static("theme=dark; auth_token=abc123"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc123"));

        headers.insert("authorization", HeaderValue::from_static("Bearer xyz"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_cookie_strings() {
        let cookie = session_cookie("tok", Duration::hours(1), false);
        assert_eq!(cookie, "auth_token=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600");
        assert!(session_cookie("tok", Duration::hours(1), true).ends_with("; Secure"));
        assert!(clear_session_cookie(false).contains("Max-Age=0"));
    }
}
