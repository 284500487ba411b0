/// Double-submit CSRF protection
///
/// Tokens have the form `nonce.digest` where the digest binds the nonce to
/// the caller's session. The same token travels in the `csrf-token` cookie
/// and the `x-csrf-token` header; mutating member and admin routes require
/// both to match and to verify against the current session.
use crate::{
    audit::{Category, SecurityEvent, Severity},
    auth::{extract::extract_session_token, ClientInfo},
    context::AppContext,
    error::{AppError, AppResult},
};
use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Cookie, HeaderMapExt};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_COOKIE: &str = "csrf-token";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Issues and checks session-bound CSRF tokens
#[derive(Clone)]
pub struct CsrfTokens {
    secret: String,
}

impl CsrfTokens {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// HMAC-SHA256 over `session|nonce`, hex encoded
    fn digest(&self, session_token: &str, nonce: &str) -> AppResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AppError::Internal(format!("invalid CSRF key: {}", e)))?;
        mac.update(session_token.as_bytes());
        mac.update(b"|");
        mac.update(nonce.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// New token bound to a session
    pub fn issue(&self, session_token: &str) -> AppResult<String> {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = hex::encode(bytes);
        Ok(format!("{}.{}", nonce, self.digest(session_token, &nonce)?))
    }

    /// Whether a token was issued for this session
    pub fn verify(&self, token: &str, session_token: &str) -> bool {
        let Some((nonce, digest)) = token.split_once('.') else {
            return false;
        };
        if nonce.is_empty() {
            return false;
        }
        match self.digest(session_token, nonce) {
            Ok(expected) => bool::from(digest.as_bytes().ct_eq(expected.as_bytes())),
            Err(_) => false,
        }
    }
}

/// `Set-Cookie` value for the CSRF cookie; readable by scripts
pub fn csrf_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!("{}={}; Path=/; SameSite=Lax", CSRF_COOKIE, token);
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn is_mutating(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Reject mutating requests without a valid double-submit token
pub async fn require_csrf(
    State(ctx): State<AppContext>,
    client: ClientInfo,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !is_mutating(request.method()) {
        return Ok(next.run(request).await);
    }

    let headers = request.headers();
    let header_token = headers
        .get(CSRF_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let cookie_token = headers
        .typed_get::<Cookie>()
        .and_then(|c| c.get(CSRF_COOKIE).map(str::to_string));
    let session_token = extract_session_token(headers);

    let reason = match (&header_token, &cookie_token, &session_token) {
        (None, _, _) | (_, None, _) => Some("missing token"),
        (_, _, None) => Some("no session"),
        (Some(header), Some(cookie), Some(session)) => {
            if !bool::from(header.as_bytes().ct_eq(cookie.as_bytes())) {
                Some("header and cookie differ")
            } else if !ctx.csrf.verify(header, session) {
                Some("token not issued for this session")
            } else {
                None
            }
        }
    };

    if let Some(reason) = reason {
        tracing::warn!(path = %request.uri().path(), reason, "CSRF check failed");
        ctx.audit
            .record(
                SecurityEvent::new(Category::Csrf, "CSRF_REJECTED", "failure")
                    .details(format!("{} {}: {}", request.method(), request.uri().path(), reason))
                    .client(&client.ip, client.user_agent.as_deref())
                    .severity(Severity::High),
            )
            .await;
        return Err(AppError::CsrfRejected);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bound_to_session() {
        let tokens = CsrfTokens::new("x".repeat(32));
        let token = tokens.issue("session-a").unwrap();

        assert!(tokens.verify(&token, "session-a"));
        assert!(!tokens.verify(&token, "session-b"));
        assert!(!tokens.verify("garbage", "session-a"));
        assert!(!tokens.verify(".abc", "session-a"));
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens = CsrfTokens::new("x".repeat(32));
        assert_ne!(tokens.issue("s").unwrap(), tokens.issue("s").unwrap());
    }

    #[test]
    fn test_other_secret_rejects() {
        let token = CsrfTokens::new("x".repeat(32)).issue("s").unwrap();
        assert!(!CsrfTokens::new("y".repeat(32)).verify(&token, "s"));
    }

    #[test]
    fn test_digest_is_hmac_sha256() {
        let tokens = CsrfTokens::new("key".to_string());
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"session|nonce");
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(tokens.digest("session", "nonce").unwrap(), expected);
        assert!(tokens.verify(&format!("nonce.{}", expected), "session"));
        assert!(!tokens.verify(&format!("nonce.{}", &expected[..10]), "session"));
    }

    #[test]
    fn test_mutating_methods() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
    }
}
