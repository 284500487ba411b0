/// Password hashing
///
/// bcrypt runs on the blocking pool so a slow hash never stalls other
/// requests or the snapshot scheduler.
use crate::error::{AppError, AppResult};

/// Hash a password with the given bcrypt cost
pub async fn hash_password(password: &str, cost: u32) -> AppResult<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a password against a stored bcrypt hash
///
/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?;

    match verified {
        Ok(matches) => Ok(matches),
        Err(e) => {
            tracing::warn!("Stored password hash could not be parsed: {}", e);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("correct horse", 4).await.unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("correct horse", &hash).await.unwrap());
        assert!(!verify_password("battery staple", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_hash_is_mismatch() {
        assert!(!verify_password("anything", "not-a-hash").await.unwrap());
    }
}
