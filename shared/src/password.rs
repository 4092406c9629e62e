//! Password hashing and strength rules.

use tokio::sync::OnceCell;
use validator::ValidationError;

use crate::{Error, Result};

/// Hash a password with bcrypt on the blocking pool.
pub async fn hash_password(plain: &str, cost: u32) -> Result<String> {
    let plain = plain.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
        .await
        .map_err(|e| Error::Internal(format!("Password hashing task failed: {}", e)))?
        .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))
}

/// Check a password against a stored bcrypt hash.
///
/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(plain: &str, hash: &str) -> Result<bool> {
    let plain = plain.to_string();
    let hash = hash.to_string();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
        .await
        .map_err(|e| Error::Internal(format!("Password verification task failed: {}", e)))?;
    Ok(verified.unwrap_or(false))
}

/// Hash compared against when no account matches, built once per process.
static DUMMY_HASH: OnceCell<String> = OnceCell::const_new();

/// Verify against the account's hash, or against a throwaway hash of the same
/// cost when there is no account, so both paths take as long.
pub async fn verify_password_or_dummy(plain: &str, hash: Option<&str>, cost: u32) -> Result<bool> {
    match hash {
        Some(hash) => verify_password(plain, hash).await,
        None => {
            let dummy = DUMMY_HASH
                .get_or_try_init(|| hash_password("unused-account-placeholder", cost))
                .await?;
            verify_password(plain, dummy).await?;
            Ok(false)
        }
    }
}

/// At least 8 characters with a lowercase letter, an uppercase letter and a digit.
pub fn validate_password_strength(password: &str) -> std::result::Result<(), ValidationError> {
    let long_enough = password.chars().count() >= 8;
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if long_enough && has_lower && has_upper && has_digit {
        Ok(())
    } else {
        let mut err = ValidationError::new("password_strength");
        err.message = Some(
            "Password must be at least 8 characters long and contain at least one uppercase letter, one lowercase letter, and one number"
                .into(),
        );
        Err(err)
    }
}
