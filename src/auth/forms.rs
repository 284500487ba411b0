/// Request bodies accepted by the auth routes, with their validation rules
use crate::error::AppError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use validator::{Validate, ValidationError, ValidationErrors};

/// Disposable mailbox providers refused at signup
const BLOCKED_EMAIL_DOMAINS: &[&str] = &[
    "mailinator.com",
    "10minutemail.com",
    "guerrillamail.com",
    "tempmail.com",
    "fakeinbox.com",
    "dispostable.com",
    "maildrop.cc",
    "yopmail.com",
];

pub const MEMBER_TYPES: &[&str] = &["Junior", "Ordinary", "Corporate"];

lazy_static! {
    static ref NAME_PATTERN: Regex = Regex::new(r"^[a-zA-Z\s.'-]+$").expect("valid name pattern");
}

fn rule(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if NAME_PATTERN.is_match(name.trim()) {
        Ok(())
    } else {
        Err(rule(
            "name",
            "Name may only contain letters, spaces, periods, apostrophes and hyphens",
        ))
    }
}

fn validate_email_domain(email: &str) -> Result<(), ValidationError> {
    let domain = email
        .trim()
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase())
        .unwrap_or_default();

    if BLOCKED_EMAIL_DOMAINS.contains(&domain.as_str()) {
        Err(rule("email_domain", "Temporary email addresses are not allowed"))
    } else {
        Ok(())
    }
}

fn validate_member_type(member_type: &str) -> Result<(), ValidationError> {
    if MEMBER_TYPES.contains(&member_type) {
        Ok(())
    } else {
        Err(rule("member_type", "Member type must be Junior, Ordinary or Corporate"))
    }
}

/// First human-readable message out of a validation failure
pub fn first_message(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| (field.to_string(), errs))
        .collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .find_map(|(field, errs)| {
            errs.first().map(|e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid {}", field))
            })
        })
        .unwrap_or_else(|| "Invalid request".to_string())
}

/// Run derive-based validation and map failures to a 400
pub fn check<T: Validate>(form: &T) -> Result<(), AppError> {
    form.validate()
        .map_err(|errors| AppError::Validation(first_message(&errors)))
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[validate(
        length(min = 1, max = 50, message = "Name must be between 1 and 50 characters"),
        custom(function = "validate_name")
    )]
    pub name: String,
    #[validate(
        email(message = "Invalid email address"),
        custom(function = "validate_email_domain")
    )]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(custom(function = "validate_member_type"))]
    pub member_type: Option<String>,
    #[validate(length(max = 100, message = "Contact is too long"))]
    pub contact: Option<String>,
    #[validate(length(max = 255, message = "Address is too long"))]
    pub address: Option<String>,
    #[validate(length(max = 100, message = "Organization is too long"))]
    pub organization: Option<String>,
    pub recaptcha_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    pub recaptcha_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub recaptcha_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(name: &str, email: &str) -> SignupRequest {
        SignupRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: "hunter22".to_string(),
            member_type: Some("Ordinary".to_string()),
            contact: None,
            address: None,
            organization: None,
            recaptcha_token: None,
        }
    }

    #[test]
    fn test_valid_signup() {
        assert!(check(&signup("Mary O'Neil-Smith", "mary@example.com")).is_ok());
    }

    #[test]
    fn test_name_rules() {
        let err = check(&signup("R2D2", "r2@example.com")).unwrap_err();
        assert!(err.to_string().contains("letters"));

        let long = "a".repeat(51);
        assert!(check(&signup(&long, "long@example.com")).is_err());
    }

    #[test]
    fn test_disposable_domains_rejected() {
        let err = check(&signup("Ann", "ann@Mailinator.com")).unwrap_err();
        assert_eq!(err.to_string(), "Temporary email addresses are not allowed");
    }

    #[test]
    fn test_member_type_rule() {
        let mut form = signup("Ann", "ann@example.com");
        form.member_type = Some("Platinum".to_string());
        assert!(check(&form).is_err());

        form.member_type = None;
        assert!(check(&form).is_ok());
    }

    #[test]
    fn test_short_password_rejected() {
        let mut form = signup("Ann", "ann@example.com");
        form.password = "12345".to_string();
        assert_eq!(
            check(&form).unwrap_err().to_string(),
            "Password must be at least 6 characters"
        );
    }

    #[test]
    fn test_signup_deserializes_camel_case() {
        let form: SignupRequest = serde_json::from_str(
            r#"{"name":"Ann","email":"ann@example.com","password":"hunter22",
                "memberType":"Junior","recaptchaToken":"tok"}"#,
        )
        .unwrap();
        assert_eq!(form.member_type.as_deref(), Some("Junior"));
        assert_eq!(form.recaptcha_token.as_deref(), Some("tok"));
    }
}
