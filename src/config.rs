/// Configuration management for the Clubhouse backend
use crate::error::{AppError, AppResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub email: Option<EmailConfig>,
    pub captcha: Option<CaptchaConfig>,
    pub rate_limit: RateLimitConfig,
    pub committee: CommitteeConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Base URL of the member frontend, used in emailed links
    pub frontend_base_url: String,
    pub cors_origin: Option<String>,
    /// Take the client address from `X-Forwarded-For`
    pub trust_proxy: bool,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub reset_password_secret: String,
    pub csrf_secret: String,
    pub bcrypt_cost: u32,
    pub cookie_secure: bool,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// reCAPTCHA configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    pub secret: String,
    pub verify_url: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Signup and reset-request budget per IP per 15 minutes
    pub auth_requests_per_window: u32,
    /// Login and OTP budget per IP per 10 minutes
    pub login_requests_per_window: u32,
}

/// Committee snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitteeConfig {
    /// Term used until an admin stores one
    pub default_term_years: u32,
    /// Run the biannual fallback trigger next to the self-rescheduling timer
    pub snapshot_fallback_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Timing policy for the authentication state machine
#[derive(Debug, Clone, Copy)]
pub struct AuthPolicy {
    pub activation_ttl: Duration,
    pub otp_ttl: Duration,
    pub session_ttl: Duration,
    pub reset_token_ttl: Duration,
    pub lockout_threshold: i64,
    pub lockout_window: Duration,
    pub otp_attempt_limit: i64,
    pub otp_attempt_window: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            activation_ttl: Duration::minutes(15),
            otp_ttl: Duration::minutes(5),
            session_ttl: Duration::hours(1),
            reset_token_ttl: Duration::minutes(15),
            lockout_threshold: 5,
            lockout_window: Duration::minutes(10),
            otp_attempt_limit: 5,
            otp_attempt_window: Duration::minutes(10),
        }
    }
}

const MIN_SECRET_LEN: usize = 32;
const MIN_BCRYPT_COST: u32 = 10;

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> AppResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid value for {}", name))),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("CLUBHOUSE_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_parse("CLUBHOUSE_PORT", 3001u16)?;
        let frontend_base_url = env::var("CLUBHOUSE_FRONTEND_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:5173".to_string());
        let cors_origin = env::var("CLUBHOUSE_CORS_ORIGIN").ok();
        let trust_proxy = env_flag("CLUBHOUSE_TRUST_PROXY", false);

        let database_path: PathBuf = env::var("CLUBHOUSE_DATABASE_PATH")
            .unwrap_or_else(|_| "./data/clubhouse.sqlite".to_string())
            .into();

        let reset_password_secret = env::var("CLUBHOUSE_RESET_PASSWORD_SECRET").map_err(|_| {
            AppError::Validation("CLUBHOUSE_RESET_PASSWORD_SECRET is required".to_string())
        })?;
        let csrf_secret = env::var("CLUBHOUSE_CSRF_SECRET")
            .map_err(|_| AppError::Validation("CLUBHOUSE_CSRF_SECRET is required".to_string()))?;
        let bcrypt_cost = env_parse("CLUBHOUSE_BCRYPT_COST", 12u32)?;
        let cookie_secure = env_flag("CLUBHOUSE_COOKIE_SECURE", false);

        let email = env::var("CLUBHOUSE_SMTP_URL").ok().map(|smtp_url| EmailConfig {
            smtp_url,
            from_address: env::var("CLUBHOUSE_EMAIL_FROM")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),
        });

        let captcha = env::var("CLUBHOUSE_RECAPTCHA_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|secret| CaptchaConfig {
                secret,
                verify_url: env::var("CLUBHOUSE_RECAPTCHA_VERIFY_URL").unwrap_or_else(|_| {
                    "https://www.google.com/recaptcha/api/siteverify".to_string()
                }),
            });

        let rate_limit = RateLimitConfig {
            enabled: env_flag("CLUBHOUSE_RATE_LIMITS_ENABLED", true),
            auth_requests_per_window: env_parse("CLUBHOUSE_AUTH_REQUESTS_PER_WINDOW", 10u32)?,
            login_requests_per_window: env_parse("CLUBHOUSE_LOGIN_REQUESTS_PER_WINDOW", 20u32)?,
        };

        let committee = CommitteeConfig {
            default_term_years: env_parse("CLUBHOUSE_DEFAULT_TERM_YEARS", 2u32)?,
            snapshot_fallback_enabled: env_flag("CLUBHOUSE_SNAPSHOT_FALLBACK_ENABLED", true),
        };

        let logging = LoggingConfig {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "clubhouse=debug,tower_http=debug".to_string()),
            json: env::var("CLUBHOUSE_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        Ok(Self {
            service: ServiceConfig {
                hostname,
                port,
                frontend_base_url,
                cors_origin,
                trust_proxy,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig { database_path },
            authentication: AuthConfig {
                reset_password_secret,
                csrf_secret,
                bcrypt_cost,
                cookie_secure,
            },
            email,
            captcha,
            rate_limit,
            committee,
            logging,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.authentication.reset_password_secret.len() < MIN_SECRET_LEN {
            return Err(AppError::Validation(format!(
                "Reset password secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        if self.authentication.csrf_secret.len() < MIN_SECRET_LEN {
            return Err(AppError::Validation(format!(
                "CSRF secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        if self.authentication.bcrypt_cost < MIN_BCRYPT_COST || self.authentication.bcrypt_cost > 31 {
            return Err(AppError::Validation(format!(
                "Bcrypt cost must be between {} and 31",
                MIN_BCRYPT_COST
            )));
        }

        if !(1..=10).contains(&self.committee.default_term_years) {
            return Err(AppError::Validation(
                "Default term must be between 1 and 10 years".to_string(),
            ));
        }

        if url::Url::parse(&self.service.frontend_base_url).is_err() {
            return Err(AppError::Validation("Frontend base URL is not a valid URL".to_string()));
        }

        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.hostname, self.service.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_validate_accepts_test_config() {
        let mut config = testutil::test_config();
        config.authentication.bcrypt_cost = 12;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_secrets() {
        let mut config = testutil::test_config();
        config.authentication.bcrypt_cost = 12;
        config.authentication.reset_password_secret = "short".to_string();
        assert!(config.validate().is_err());

        let mut config = testutil::test_config();
        config.authentication.bcrypt_cost = 12;
        config.authentication.csrf_secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_weak_bcrypt_cost() {
        let mut config = testutil::test_config();
        config.authentication.bcrypt_cost = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_policy_windows() {
        let policy = AuthPolicy::default();
        assert_eq!(policy.otp_ttl, Duration::minutes(5));
        assert_eq!(policy.activation_ttl, Duration::minutes(15));
        assert_eq!(policy.session_ttl, Duration::hours(1));
        assert_eq!(policy.lockout_threshold, 5);
    }
}
