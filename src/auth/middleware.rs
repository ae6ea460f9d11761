//! Authentication middleware.

use axum::{
    extract::{Request, State},
    http::{
        HeaderValue,
        header::{AUTHORIZATION, VARY},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{
    CurrentIdentity, Scope,
    token::{hash_token, validate_format},
};
use crate::{
    api::{ApiError, SharedState},
    store::{CredentialStore, StoreError},
};

/// Turn an `Authorization` header into the identity of the caller.
///
/// No header means anonymous. Anything but `Bearer <26 chars>` is rejected
/// without touching the store.
///
/// # Errors
/// `MalformedCredential` for a bad header or token shape,
/// `InvalidAuthenticationToken` when no live token matches, and
/// `ServerFault` for any other store failure.
pub async fn resolve_identity<S: CredentialStore + ?Sized>(
    store: &S,
    header: Option<&HeaderValue>,
    now: DateTime<Utc>,
) -> Result<CurrentIdentity, ApiError> {
    let Some(header) = header else {
        return Ok(CurrentIdentity::Anonymous);
    };

    let value = header
        .to_str()
        .map_err(|_| ApiError::MalformedCredential)?;

    let token = match value.split_once(' ') {
        Some(("Bearer", token)) if !token.contains(' ') => token,
        _ => return Err(ApiError::MalformedCredential),
    };

    if !validate_format(token) {
        return Err(ApiError::MalformedCredential);
    }

    let hash = hash_token(token);
    match store
        .find_identity_by_token(&hash, Scope::Authentication, now)
        .await
    {
        Ok(identity) => {
            debug!(user_id = identity.id, "request authenticated");
            Ok(identity.into())
        }
        Err(StoreError::NotFound) => Err(ApiError::InvalidAuthenticationToken),
        Err(err) => Err(ApiError::fault(err)),
    }
}

/// Install the caller's [`CurrentIdentity`] on the request.
///
/// Every response, including rejections, varies on `Authorization`.
pub async fn authenticate(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request.headers().get(AUTHORIZATION).cloned();
    let resolved = resolve_identity(state.credentials.as_ref(), header.as_ref(), Utc::now()).await;

    let mut response = match resolved {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    };

    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Authorization"));

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{Identity, NewIdentity, Permissions, TokenRecord},
        store::{StoreFuture, VersionedStore},
    };
    use anyhow::{Result, anyhow};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOKEN: &str = "Y3QMGX3PJ3WLRL2YRTQGQ6KRHU";

    /// Credential store that counts lookups and answers with a fixed result.
    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
        known: Option<Identity>,
        broken: bool,
    }

    impl CountingStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl VersionedStore<Identity> for CountingStore {
        fn fetch(&self, _id: i64) -> StoreFuture<'_, Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(StoreError::NotFound) })
        }

        fn update_versioned<'a>(
            &'a self,
            _record: &'a Identity,
            _expected_version: i32,
        ) -> StoreFuture<'a, i32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(StoreError::NotFound) })
        }
    }

    impl CredentialStore for CountingStore {
        fn find_identity_by_token<'a>(
            &'a self,
            token_hash: &'a [u8],
            scope: Scope,
            _now: DateTime<Utc>,
        ) -> StoreFuture<'a, Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if self.broken {
                    return Err(StoreError::Fault(anyhow!("connection refused")));
                }
                match &self.known {
                    Some(identity)
                        if token_hash == hash_token(TOKEN) && scope == Scope::Authentication =>
                    {
                        Ok(identity.clone())
                    }
                    _ => Err(StoreError::NotFound),
                }
            })
        }

        fn find_identity_by_email<'a>(&'a self, _email: &'a str) -> StoreFuture<'a, Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(StoreError::NotFound) })
        }

        fn insert_identity<'a>(&'a self, _identity: &'a NewIdentity) -> StoreFuture<'a, Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(StoreError::NotFound) })
        }

        fn insert_token<'a>(&'a self, _token: &'a TokenRecord) -> StoreFuture<'a, ()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn delete_tokens(&self, _scope: Scope, _user_id: i64) -> StoreFuture<'_, ()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn permissions_for_user(&self, _user_id: i64) -> StoreFuture<'_, Permissions> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Permissions::default()) })
        }

        fn grant_permissions<'a>(
            &'a self,
            _user_id: i64,
            _codes: &'a [&'a str],
        ) -> StoreFuture<'a, ()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn known_store() -> CountingStore {
        CountingStore {
            known: Some(Identity {
                id: 7,
                created_at: Utc::now(),
                name: "Dana".to_string(),
                email: "dana@example.com".to_string(),
                password_hash: String::new(),
                activated: true,
                version: 1,
            }),
            ..CountingStore::default()
        }
    }

    #[tokio::test]
    async fn missing_header_is_anonymous() -> Result<()> {
        let store = CountingStore::default();
        let current = resolve_identity(&store, None, Utc::now()).await?;
        assert!(current.is_anonymous());
        assert_eq!(store.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_headers_never_reach_the_store() {
        let store = known_store();
        let headers = [
            "Bearer".to_string(),
            "Bearer ".to_string(),
            format!("Basic {TOKEN}"),
            format!("bearer {TOKEN}"),
            format!("Bearer  {TOKEN}"),
            format!("Bearer {TOKEN} extra"),
            "Bearer short".to_string(),
            format!("Bearer {TOKEN}X"),
        ];

        for header in headers {
            let value = HeaderValue::from_str(&header).unwrap_or(HeaderValue::from_static("x"));
            let result = resolve_identity(&store, Some(&value), Utc::now()).await;
            assert!(
                matches!(result, Err(ApiError::MalformedCredential)),
                "{header:?} should be malformed"
            );
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn non_utf8_header_is_malformed() -> Result<()> {
        let store = known_store();
        let value = HeaderValue::from_bytes(b"Bearer \xff\xfe")?;
        let result = resolve_identity(&store, Some(&value), Utc::now()).await;
        assert!(matches!(result, Err(ApiError::MalformedCredential)));
        assert_eq!(store.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn known_token_resolves_user() -> Result<()> {
        let store = known_store();
        let value = HeaderValue::from_str(&format!("Bearer {TOKEN}"))?;
        let current = resolve_identity(&store, Some(&value), Utc::now()).await?;
        assert_eq!(current.user().map(|user| user.id), Some(7));
        assert_eq!(store.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() -> Result<()> {
        let store = CountingStore::default();
        let value = HeaderValue::from_str(&format!("Bearer {TOKEN}"))?;
        let result = resolve_identity(&store, Some(&value), Utc::now()).await;
        assert!(matches!(result, Err(ApiError::InvalidAuthenticationToken)));
        assert_eq!(store.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn store_failure_is_a_server_fault() -> Result<()> {
        let store = CountingStore {
            broken: true,
            ..CountingStore::default()
        };
        let value = HeaderValue::from_str(&format!("Bearer {TOKEN}"))?;
        let result = resolve_identity(&store, Some(&value), Utc::now()).await;
        assert!(matches!(result, Err(ApiError::ServerFault(_))));
        Ok(())
    }
}
