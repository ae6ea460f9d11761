//! Opaque bearer tokens.
//!
//! A token is 16 bytes from the OS random source, base-32 encoded without
//! padding. Callers see the plaintext exactly once, when it is issued; the
//! store only ever holds the SHA-256 of it.

use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc};
use tracing::debug;

use crate::store::{CredentialStore, StoreError};

/// Length of every plaintext token.
pub const TOKEN_LENGTH: usize = 26;

const TOKEN_BYTES: usize = 16;

/// What a token may be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Authentication,
    Activation,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Activation => "activation",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted half of a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub hash: [u8; 32],
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    pub scope: Scope,
}

/// A freshly issued token, plaintext included.
#[derive(Debug)]
pub struct AuthToken {
    pub plaintext: SecretString,
    pub hash: [u8; 32],
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    pub scope: Scope,
}

impl AuthToken {
    #[must_use]
    pub fn record(&self) -> TokenRecord {
        TokenRecord {
            hash: self.hash,
            user_id: self.user_id,
            expiry: self.expiry,
            scope: self.scope,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to read from the OS random source: {0}")]
    Entropy(#[from] rand::Error),
    #[error("token lifetime of {0} overflows the expiry timestamp")]
    ExpiryOverflow(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Generate a plaintext token.
///
/// # Errors
/// Returns an error if the OS random source is unavailable.
pub fn generate_token() -> Result<SecretString, rand::Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(SecretString::from(base32::encode(
        base32::Alphabet::Rfc4648 { padding: false },
        &bytes,
    )))
}

/// SHA-256 of the plaintext, the only form the store sees.
#[must_use]
pub fn hash_token(plaintext: &str) -> [u8; 32] {
    Sha256::digest(plaintext.as_bytes()).into()
}

/// Cheap shape check done before any store lookup.
#[must_use]
pub fn validate_format(plaintext: &str) -> bool {
    plaintext.len() == TOKEN_LENGTH
}

/// Issues and revokes tokens against a credential store.
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}

impl TokenManager {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Create and persist a token for `user_id` that expires after `ttl`.
    ///
    /// # Errors
    /// Fails if the random source or the store fails; nothing is retried.
    pub async fn issue(
        &self,
        user_id: i64,
        ttl: Duration,
        scope: Scope,
    ) -> Result<AuthToken, TokenError> {
        self.issue_at(user_id, ttl, scope, Utc::now()).await
    }

    /// Same as [`TokenManager::issue`] with an explicit clock.
    ///
    /// # Errors
    /// Fails if `now + ttl` is not representable, or if the random source or
    /// the store fails.
    pub async fn issue_at(
        &self,
        user_id: i64,
        ttl: Duration,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Result<AuthToken, TokenError> {
        let expiry = now
            .checked_add_signed(ttl)
            .ok_or(TokenError::ExpiryOverflow(ttl))?;

        let plaintext = generate_token()?;
        let token = AuthToken {
            hash: hash_token(plaintext.expose_secret()),
            plaintext,
            user_id,
            expiry,
            scope,
        };

        self.store.insert_token(&token.record()).await?;

        debug!(user_id, scope = %scope, expiry = %token.expiry, "token issued");

        Ok(token)
    }

    /// Delete every token of `user_id` in `scope`.
    ///
    /// # Errors
    /// Propagates store failures unchanged.
    pub async fn revoke_all(&self, scope: Scope, user_id: i64) -> Result<(), TokenError> {
        self.store.delete_tokens(scope, user_id).await?;

        debug!(user_id, scope = %scope, "tokens revoked");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NewIdentity;
    use crate::store::{CredentialStore, MemoryStore};
    use anyhow::{Result, anyhow};

    async fn store_with_user(id: i64) -> Result<Arc<MemoryStore>> {
        let store = Arc::new(MemoryStore::new());
        for n in 1..=id {
            store
                .insert_identity(&NewIdentity {
                    name: format!("user {n}"),
                    email: format!("user{n}@example.com"),
                    password_hash: String::new(),
                    activated: true,
                })
                .await?;
        }
        Ok(store)
    }

    #[test]
    fn generated_tokens_are_26_chars_of_base32() -> Result<()> {
        let token = generate_token()?;
        let plaintext = token.expose_secret();
        assert_eq!(plaintext.len(), TOKEN_LENGTH);
        assert!(
            plaintext
                .chars()
                .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
        );
        Ok(())
    }

    #[test]
    fn generated_tokens_differ() -> Result<()> {
        let first = generate_token()?;
        let second = generate_token()?;
        assert_ne!(first.expose_secret(), second.expose_secret());
        Ok(())
    }

    #[test]
    fn hash_token_is_stable() {
        let first = hash_token("Y3QMGX3PJ3WLRL2YRTQGQ6KRHU");
        let second = hash_token("Y3QMGX3PJ3WLRL2YRTQGQ6KRHU");
        let different = hash_token("Y3QMGX3PJ3WLRL2YRTQGQ6KRHV");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[test]
    fn validate_format_only_accepts_26_chars() {
        assert!(validate_format("Y3QMGX3PJ3WLRL2YRTQGQ6KRHU"));
        assert!(!validate_format(""));
        assert!(!validate_format("Y3QMGX3PJ3WLRL2YRTQGQ6KRH"));
        assert!(!validate_format("Y3QMGX3PJ3WLRL2YRTQGQ6KRHUU"));
    }

    #[test]
    fn scope_names() {
        assert_eq!(Scope::Authentication.to_string(), "authentication");
        assert_eq!(Scope::Activation.as_str(), "activation");
    }

    #[tokio::test]
    async fn issued_token_resolves_until_expiry() -> Result<()> {
        let store = store_with_user(7).await?;
        let manager = TokenManager::new(store.clone());
        let now = Utc::now();

        let token = manager
            .issue_at(7, Duration::hours(24), Scope::Authentication, now)
            .await?;
        assert_eq!(token.expiry, now + Duration::hours(24));

        let hash = hash_token(token.plaintext.expose_secret());
        let identity = store
            .find_identity_by_token(&hash, Scope::Authentication, now)
            .await?;
        assert_eq!(identity.id, 7);

        let later = now + Duration::hours(24) + Duration::seconds(1);
        let expired = store
            .find_identity_by_token(&hash, Scope::Authentication, later)
            .await;
        assert!(matches!(expired, Err(StoreError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn oversized_lifetime_is_an_error() -> Result<()> {
        let store = store_with_user(1).await?;
        let manager = TokenManager::new(store.clone());

        let result = manager
            .issue(1, Duration::seconds(9_000_000_000_000), Scope::Authentication)
            .await;

        assert!(matches!(result, Err(TokenError::ExpiryOverflow(_))));
        assert_eq!(store.token_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn token_scope_is_enforced() -> Result<()> {
        let store = store_with_user(1).await?;
        let manager = TokenManager::new(store.clone());

        let token = manager
            .issue(1, Duration::hours(1), Scope::Activation)
            .await?;
        let hash = hash_token(token.plaintext.expose_secret());
        let result = store
            .find_identity_by_token(&hash, Scope::Authentication, Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_only_touches_one_scope() -> Result<()> {
        let store = store_with_user(1).await?;
        let manager = TokenManager::new(store.clone());
        let now = Utc::now();

        let session = manager
            .issue_at(1, Duration::hours(1), Scope::Authentication, now)
            .await?;
        let activation = manager
            .issue_at(1, Duration::hours(1), Scope::Activation, now)
            .await?;

        manager.revoke_all(Scope::Authentication, 1).await?;

        let session_hash = hash_token(session.plaintext.expose_secret());
        if store
            .find_identity_by_token(&session_hash, Scope::Authentication, now)
            .await
            .is_ok()
        {
            return Err(anyhow!("session token survived revocation"));
        }
        let activation_hash = hash_token(activation.plaintext.expose_secret());
        let identity = store
            .find_identity_by_token(&activation_hash, Scope::Activation, now)
            .await?;
        assert_eq!(identity.id, 1);
        Ok(())
    }
}
