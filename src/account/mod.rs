/// Credential store
///
/// Persisted member records, their status lifecycle, activation tokens and
/// the profile and moderation operations built on top of them.

mod manager;

pub use manager::AccountManager;

use serde::{Deserialize, Serialize};

/// Fields captured at signup, with the password already hashed
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub member_type: Option<String>,
    pub contact: Option<String>,
    pub address: Option<String>,
    pub organization: Option<String>,
}

/// Member-editable profile fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub contact: Option<String>,
    pub address: Option<String>,
    pub organization: Option<String>,
}

/// Trimmed, lowercased form used for storage and lookups
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
