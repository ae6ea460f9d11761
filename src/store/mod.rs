//! Credential and record storage.
//!
//! Middleware, gates and handlers only talk to the traits in this module:
//!
//! - [`CredentialStore`] persists identities and token hashes.
//! - [`RecordStore`] persists the generic versioned records.
//! - [`VersionedStore`] is the compare-and-swap primitive both build on; it
//!   is what [`crate::concurrency`] drives.
//!
//! Every call resolves to a tagged [`StoreError`] so callers never inspect
//! driver messages. [`TimedStore`] bounds each call with a deadline; the
//! server always wraps its backend in one.

mod memory;
mod postgres;
mod record;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use record::{Metadata, NewRecord, Record, RecordQuery, RecordSort, SortColumn};

use chrono::{DateTime, Utc};
use std::{fmt, future::Future, pin::Pin, time::Duration};

use crate::auth::{Identity, NewIdentity, Permissions, Scope, TokenRecord};

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Which invariant a rejected write would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The stored version moved on since the caller read the record.
    Edit,
    /// A unique column already holds the value; carries the column name.
    Duplicate(&'static str),
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Edit => write!(f, "edit conflict"),
            Self::Duplicate(field) => write!(f, "duplicate {field}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("{0}")]
    Conflict(ConflictKind),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

/// Version-conditioned access to one kind of record.
pub trait VersionedStore<R>: Send + Sync {
    /// Load the current state of a record.
    fn fetch(&self, id: i64) -> StoreFuture<'_, R>;

    /// Write `record` only if the stored version still equals
    /// `expected_version`. Returns the incremented version.
    ///
    /// A write that matches no row is reported as
    /// `Conflict(ConflictKind::Edit)`, not `NotFound`.
    fn update_versioned<'a>(&'a self, record: &'a R, expected_version: i32)
    -> StoreFuture<'a, i32>;
}

pub trait CredentialStore: VersionedStore<Identity> {
    /// Resolve the owner of an unexpired token with the given hash and scope.
    fn find_identity_by_token<'a>(
        &'a self,
        token_hash: &'a [u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Identity>;

    fn find_identity_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Identity>;

    fn insert_identity<'a>(&'a self, identity: &'a NewIdentity) -> StoreFuture<'a, Identity>;

    fn insert_token<'a>(&'a self, token: &'a TokenRecord) -> StoreFuture<'a, ()>;

    /// Delete every token of `user_id` in `scope`.
    fn delete_tokens(&self, scope: Scope, user_id: i64) -> StoreFuture<'_, ()>;

    /// Permission codes held by `user_id`; empty for a user without grants.
    fn permissions_for_user(&self, user_id: i64) -> StoreFuture<'_, Permissions>;

    /// Link `user_id` to each known code in `codes`. Granting twice is a no-op.
    fn grant_permissions<'a>(&'a self, user_id: i64, codes: &'a [&'a str]) -> StoreFuture<'a, ()>;
}

pub trait RecordStore: VersionedStore<Record> {
    fn insert_record<'a>(&'a self, record: &'a NewRecord) -> StoreFuture<'a, Record>;

    fn delete_record(&self, id: i64) -> StoreFuture<'_, ()>;

    /// One page of records plus the total number of matches.
    fn list_records<'a>(&'a self, query: &'a RecordQuery) -> StoreFuture<'a, (Vec<Record>, u64)>;
}

/// Everything the API needs from a backend.
pub trait Store: CredentialStore + RecordStore {}

impl<T: CredentialStore + RecordStore + ?Sized> Store for T {}

/// Applies a per-call deadline to every operation of the wrapped store.
#[derive(Debug)]
pub struct TimedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimedStore<S> {
    #[must_use]
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn bounded<'a, T: Send + 'a>(&self, call: StoreFuture<'a, T>) -> StoreFuture<'a, T> {
        let timeout = self.timeout;
        Box::pin(async move {
            match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(timeout)),
            }
        })
    }
}

impl<S: VersionedStore<Identity>> VersionedStore<Identity> for TimedStore<S> {
    fn fetch(&self, id: i64) -> StoreFuture<'_, Identity> {
        self.bounded(VersionedStore::<Identity>::fetch(&self.inner, id))
    }

    fn update_versioned<'a>(
        &'a self,
        record: &'a Identity,
        expected_version: i32,
    ) -> StoreFuture<'a, i32> {
        self.bounded(self.inner.update_versioned(record, expected_version))
    }
}

impl<S: VersionedStore<Record>> VersionedStore<Record> for TimedStore<S> {
    fn fetch(&self, id: i64) -> StoreFuture<'_, Record> {
        self.bounded(VersionedStore::<Record>::fetch(&self.inner, id))
    }

    fn update_versioned<'a>(
        &'a self,
        record: &'a Record,
        expected_version: i32,
    ) -> StoreFuture<'a, i32> {
        self.bounded(self.inner.update_versioned(record, expected_version))
    }
}

impl<S: CredentialStore> CredentialStore for TimedStore<S> {
    fn find_identity_by_token<'a>(
        &'a self,
        token_hash: &'a [u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Identity> {
        self.bounded(self.inner.find_identity_by_token(token_hash, scope, now))
    }

    fn find_identity_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Identity> {
        self.bounded(self.inner.find_identity_by_email(email))
    }

    fn insert_identity<'a>(&'a self, identity: &'a NewIdentity) -> StoreFuture<'a, Identity> {
        self.bounded(self.inner.insert_identity(identity))
    }

    fn insert_token<'a>(&'a self, token: &'a TokenRecord) -> StoreFuture<'a, ()> {
        self.bounded(self.inner.insert_token(token))
    }

    fn delete_tokens(&self, scope: Scope, user_id: i64) -> StoreFuture<'_, ()> {
        self.bounded(self.inner.delete_tokens(scope, user_id))
    }

    fn permissions_for_user(&self, user_id: i64) -> StoreFuture<'_, Permissions> {
        self.bounded(self.inner.permissions_for_user(user_id))
    }

    fn grant_permissions<'a>(&'a self, user_id: i64, codes: &'a [&'a str]) -> StoreFuture<'a, ()> {
        self.bounded(self.inner.grant_permissions(user_id, codes))
    }
}

impl<S: RecordStore> RecordStore for TimedStore<S> {
    fn insert_record<'a>(&'a self, record: &'a NewRecord) -> StoreFuture<'a, Record> {
        self.bounded(self.inner.insert_record(record))
    }

    fn delete_record(&self, id: i64) -> StoreFuture<'_, ()> {
        self.bounded(self.inner.delete_record(id))
    }

    fn list_records<'a>(&'a self, query: &'a RecordQuery) -> StoreFuture<'a, (Vec<Record>, u64)> {
        self.bounded(self.inner.list_records(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};

    /// Store whose lookups never complete within any sensible deadline.
    struct StalledStore;

    impl VersionedStore<Identity> for StalledStore {
        fn fetch(&self, _id: i64) -> StoreFuture<'_, Identity> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(StoreError::NotFound)
            })
        }

        fn update_versioned<'a>(
            &'a self,
            _record: &'a Identity,
            _expected_version: i32,
        ) -> StoreFuture<'a, i32> {
            Box::pin(async { Err(StoreError::Conflict(ConflictKind::Edit)) })
        }
    }

    #[tokio::test]
    async fn timed_store_turns_stalls_into_timeouts() {
        let store = TimedStore::new(StalledStore, Duration::from_millis(20));
        let result = VersionedStore::<Identity>::fetch(&store, 1).await;
        assert!(matches!(result, Err(StoreError::Timeout(timeout)) if timeout == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn timed_store_passes_results_through() {
        let store = TimedStore::new(StalledStore, Duration::from_secs(1));
        let identity = Identity {
            id: 1,
            created_at: Utc::now(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            activated: true,
            version: 1,
        };
        let result = store.update_versioned(&identity, 1).await;
        assert!(matches!(
            result,
            Err(StoreError::Conflict(ConflictKind::Edit))
        ));
    }

    #[test]
    fn conflict_kind_display() {
        assert_eq!(ConflictKind::Edit.to_string(), "edit conflict");
        assert_eq!(
            ConflictKind::Duplicate("email").to_string(),
            "duplicate email"
        );
    }

    #[test]
    fn store_error_wraps_anyhow() -> Result<()> {
        let err: StoreError = anyhow!("connection reset").into();
        match err {
            StoreError::Fault(inner) => assert_eq!(inner.to_string(), "connection reset"),
            other => return Err(anyhow!("unexpected error: {other:?}")),
        }
        Ok(())
    }
}
