/// CAPTCHA verification gate
///
/// Signup, login and reset requests are checked here before the auth state
/// machine sees them.
use crate::{
    config::CaptchaConfig,
    error::{AppError, AppResult},
};
use async_trait::async_trait;
use serde::Deserialize;

/// Verifies a client-supplied CAPTCHA response
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// `Ok(())` when the request may proceed
    async fn verify(&self, token: Option<&str>, remote_ip: &str) -> AppResult<()>;
}

/// Accepts everything; used when no secret is configured
#[derive(Debug, Default)]
pub struct DisabledCaptcha;

#[async_trait]
impl CaptchaVerifier for DisabledCaptcha {
    async fn verify(&self, _token: Option<&str>, _remote_ip: &str) -> AppResult<()> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Google reCAPTCHA siteverify client
pub struct RecaptchaVerifier {
    client: reqwest::Client,
    config: CaptchaConfig,
}

impl RecaptchaVerifier {
    pub fn new(config: CaptchaConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, token: Option<&str>, remote_ip: &str) -> AppResult<()> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Validation("CAPTCHA verification required".to_string()))?;

        let response = self
            .client
            .post(&self.config.verify_url)
            .form(&[
                ("secret", self.config.secret.as_str()),
                ("response", token),
                ("remoteip", remote_ip),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("CAPTCHA verification failed: {}", e)))?
            .json::<SiteVerifyResponse>()
            .await
            .map_err(|e| AppError::Internal(format!("Invalid CAPTCHA response: {}", e)))?;

        if !response.success {
            tracing::info!(errors = ?response.error_codes, "CAPTCHA rejected");
            return Err(AppError::Validation("CAPTCHA verification failed".to_string()));
        }

        Ok(())
    }
}

/// Build the verifier for the configured mode
pub fn from_config(config: Option<CaptchaConfig>) -> AppResult<std::sync::Arc<dyn CaptchaVerifier>> {
    Ok(match config {
        Some(config) => std::sync::Arc::new(RecaptchaVerifier::new(config)?),
        None => {
            tracing::warn!("CAPTCHA secret not configured, verification disabled");
            std::sync::Arc::new(DisabledCaptcha)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_captcha_allows() {
        assert!(DisabledCaptcha.verify(None, "1.2.3.4").await.is_ok());
    }

    #[tokio::test]
    async fn test_recaptcha_requires_token() {
        let verifier = RecaptchaVerifier::new(CaptchaConfig {
            secret: "secret".to_string(),
            verify_url: "http://127.0.0.1:9/siteverify".to_string(),
        })
        .unwrap();

        let result = verifier.verify(Some("   "), "1.2.3.4").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_siteverify_response_parsing() {
        let parsed: SiteVerifyResponse =
            serde_json::from_str(r#"{"success":false,"error-codes":["timeout-or-duplicate"]}"#)
                .unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error_codes, vec!["timeout-or-duplicate"]);
    }
}
