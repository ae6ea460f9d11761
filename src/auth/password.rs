//! Password hashing with argon2id.
//!
//! Hashing is CPU bound, so both operations run on the blocking pool.

use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;

// Hash of a random password nobody knows, computed on first use.
static DECOY_HASH: OnceCell<String> = OnceCell::const_new();

/// Hash a plaintext password into a PHC string.
///
/// # Errors
/// Returns an error if hashing fails or the blocking task is cancelled.
pub async fn hash(password: SecretString) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| anyhow!("failed to hash password: {err}"))
    })
    .await
    .context("password hashing task failed")?
}

/// Check a plaintext password against a stored PHC string.
///
/// A malformed stored hash is an error, a wrong password is `Ok(false)`.
///
/// # Errors
/// Returns an error if the stored hash cannot be parsed.
pub async fn verify(password: SecretString, stored_hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored_hash)
            .map_err(|err| anyhow!("stored password hash is invalid: {err}"))?;
        Ok(Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .context("password verification task failed")?
}

/// Spend the same argon2 work as [`verify`] against a hash nothing matches.
///
/// Run this when there is no stored hash to check, so the response time does
/// not reveal whether the account exists. Always `Ok(false)` on success.
///
/// # Errors
/// Returns an error if the decoy hash cannot be built or checked.
pub async fn verify_decoy(password: SecretString) -> Result<bool> {
    let decoy = DECOY_HASH
        .get_or_try_init(|| async {
            let filler = crate::auth::token::generate_token()
                .context("failed to generate decoy password")?;
            hash(filler).await
        })
        .await?;
    verify(password, decoy.clone()).await.map(|_| false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify() -> Result<()> {
        let stored = hash(SecretString::from("pa55word1234")).await?;
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify(SecretString::from("pa55word1234"), stored.clone()).await?);
        assert!(!verify(SecretString::from("wrong password"), stored).await?);
        Ok(())
    }

    #[tokio::test]
    async fn verify_rejects_garbage_hash() {
        let result = verify(SecretString::from("pa55word1234"), "not-a-hash".to_string()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn decoy_never_matches() -> Result<()> {
        assert!(!verify_decoy(SecretString::from("pa55word1234")).await?);
        assert!(!verify_decoy(SecretString::from("")).await?);
        let decoy = DECOY_HASH.get().cloned().unwrap_or_default();
        assert!(decoy.starts_with("$argon2id$"));
        Ok(())
    }
}
