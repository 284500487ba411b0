/// Password reset tokens
///
/// Self-contained HS256 tokens carrying the email; nothing is stored. Expiry
/// is checked against the injected clock rather than the library's.
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
};
use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const RESET_PURPOSE: &str = "password_reset";

#[derive(Debug, Serialize, Deserialize)]
struct ResetClaims {
    sub: String,
    purpose: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies reset tokens
pub struct ResetTokens {
    secret: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResetTokens {
    pub fn new(secret: String, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { secret, ttl, clock }
    }

    /// Sign a token for an email
    pub fn issue(&self, email: &str) -> AppResult<String> {
        let now = self.clock.now();
        let claims = ResetClaims {
            sub: email.to_string(),
            purpose: RESET_PURPOSE.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Failed to sign reset token: {}", e)))
    }

    /// Email carried by a valid, unexpired token
    pub fn verify(&self, token: &str) -> AppResult<String> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<ResetClaims>(
            token.trim(),
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!("Reset token rejected: {}", e);
            invalid_reset_token()
        })?;

        let claims = data.claims;
        if claims.purpose != RESET_PURPOSE || self.clock.now().timestamp() >= claims.exp {
            return Err(invalid_reset_token());
        }

        Ok(claims.sub)
    }
}

/// Generic failure for any unusable reset token
pub fn invalid_reset_token() -> AppError {
    AppError::Validation("Invalid or expired reset link".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ManualClock;

    fn tokens(clock: Arc<ManualClock>, secret: &str) -> ResetTokens {
        ResetTokens::new(secret.to_string(), Duration::minutes(15), clock)
    }

    #[test]
    fn test_issue_and_verify() {
        let clock = Arc::new(ManualClock::default());
        let resets = tokens(clock, "0123456789abcdef0123456789abcdef");
        let token = resets.issue("ada@example.com").unwrap();
        assert_eq!(resets.verify(&token).unwrap(), "ada@example.com");
    }

    #[test]
    fn test_expired_token_rejected() {
        let clock = Arc::new(ManualClock::default());
        let resets = tokens(clock.clone(), "0123456789abcdef0123456789abcdef");
        let token = resets.issue("ada@example.com").unwrap();

        clock.advance(Duration::minutes(14));
        assert!(resets.verify(&token).is_ok());

        clock.advance(Duration::minutes(2));
        assert!(matches!(resets.verify(&token), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let clock = Arc::new(ManualClock::default());
        let token = tokens(clock.clone(), "0123456789abcdef0123456789abcdef")
            .issue("ada@example.com")
            .unwrap();
        let other = tokens(clock, "ffffffffffffffffffffffffffffffff");
        assert!(other.verify(&token).is_err());
        assert!(other.verify("not.a.token").is_err());
    }
}
