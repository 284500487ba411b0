/// Unified error types for the Clubhouse backend
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed input, surfaced verbatim to the client
    #[error("{0}")]
    Validation(String),

    /// Unknown email, wrong password or unusable account status
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Account locked by repeated failures or by an admin
    #[error("Account locked")]
    AccountLocked,

    /// Valid second factor but the account may not hold a session
    #[error("Your account is not permitted to log in")]
    AccountNotPermitted,

    /// Activation token missing or unknown
    #[error("Invalid activation link")]
    InvalidToken,

    /// Activation token already redeemed
    #[error("Activation link already used")]
    TokenAlreadyUsed,

    /// Activation token past its window
    #[error("Activation link expired")]
    TokenExpired,

    /// OTP absent, mismatched or expired
    #[error("Invalid or expired OTP")]
    InvalidOrExpiredOtp,

    /// Missing or invalid session
    #[error("{0}")]
    Authentication(String),

    /// Authenticated but not allowed
    #[error("{0}")]
    Authorization(String),

    /// Double-submit token missing or mismatched
    #[error("Invalid CSRF token")]
    CsrfRejected,

    /// Too many attempts
    #[error("{0}")]
    RateLimited(String),

    /// Not found errors
    #[error("{0}")]
    NotFound(String),

    /// Conflict errors
    #[error("{0}")]
    Conflict(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Email delivery errors
    #[error("Mail error: {0}")]
    Mail(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl AppError {
    /// HTTP status and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "InvalidRequest"),
            AppError::InvalidToken => (StatusCode::BAD_REQUEST, "InvalidToken"),
            AppError::TokenAlreadyUsed => (StatusCode::BAD_REQUEST, "TokenAlreadyUsed"),
            AppError::TokenExpired => (StatusCode::BAD_REQUEST, "TokenExpired"),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "InvalidCredentials"),
            AppError::InvalidOrExpiredOtp => (StatusCode::UNAUTHORIZED, "InvalidOrExpiredOtp"),
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, "AuthenticationRequired"),
            AppError::AccountLocked => (StatusCode::FORBIDDEN, "AccountLocked"),
            AppError::AccountNotPermitted => (StatusCode::FORBIDDEN, "AccountNotPermitted"),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            AppError::CsrfRejected => (StatusCode::FORBIDDEN, "CsrfRejected"),
            AppError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "RateLimited"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            AppError::Database(_)
            | AppError::Io(_)
            | AppError::Mail(_)
            | AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError"),
        }
    }

    /// Whether the error is an unexpected failure that must not leak details
    pub fn is_internal(&self) -> bool {
        self.status_and_code().0 == StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Short random reference attached to 500 responses for support correlation
pub fn trace_reference() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let body = if self.is_internal() {
            let reference = trace_reference();
            tracing::error!(reference = %reference, error = ?self, "request failed");
            ErrorResponse {
                error: code.to_string(),
                message: format!("Something went wrong. Please contact support. (Ref: {})", reference),
                reference: Some(reference),
            }
        } else {
            ErrorResponse {
                error: code.to_string(),
                message: self.to_string(),
                reference: None,
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for service operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::InvalidCredentials.status_and_code().0, StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::AccountLocked.status_and_code().0, StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RateLimited("slow down".into()).status_and_code().0,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AppError::TokenExpired.status_and_code().0, StatusCode::BAD_REQUEST);
        assert!(AppError::Internal("boom".into()).is_internal());
        assert!(!AppError::InvalidOrExpiredOtp.is_internal());
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let response = AppError::Internal("connection refused at 10.0.0.3".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.message.contains("10.0.0.3"));
        let reference = body.reference.expect("internal errors carry a reference");
        assert_eq!(reference.len(), 8);
        assert!(body.message.contains(&reference));
    }

    #[test]
    fn test_trace_reference_alphabet() {
        let reference = trace_reference();
        assert!(reference.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
