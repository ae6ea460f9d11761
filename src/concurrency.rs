//! Optimistic concurrency for versioned records.
//!
//! An update is a read, a caller-supplied mutation and a write conditioned on
//! the version that was read. Losing the race is an edit conflict; the caller
//! decides whether to re-read and try again.

use tracing::debug;

use crate::{
    api::ApiError,
    auth::Identity,
    store::{Record, StoreError, VersionedStore},
};

/// A record carrying a version counter.
pub trait Versioned {
    fn id(&self) -> i64;
    fn version(&self) -> i32;
    fn set_version(&mut self, version: i32);
}

impl Versioned for Identity {
    fn id(&self) -> i64 {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

impl Versioned for Record {
    fn id(&self) -> i64 {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

/// Write `record` if the stored version is still `expected_version`.
///
/// On success the record carries the new version.
///
/// # Errors
/// `EditConflict` when another writer got there first, `DuplicateUnique`
/// for a uniqueness violation, `ServerFault` otherwise.
pub async fn commit<R, S>(store: &S, record: &mut R, expected_version: i32) -> Result<(), ApiError>
where
    R: Versioned + Send + Sync,
    S: VersionedStore<R> + ?Sized,
{
    match store.update_versioned(record, expected_version).await {
        Ok(version) => {
            debug!(id = record.id(), version, "versioned update committed");
            record.set_version(version);
            Ok(())
        }
        // The row existed when it was read, so a miss now is a lost race too.
        Err(StoreError::NotFound) => Err(ApiError::EditConflict),
        Err(err) => Err(err.into()),
    }
}

/// Fetch, mutate and conditionally write a record.
///
/// `observed` is the version the caller last saw, if it sent one; a stale
/// value fails before anything is written. `mutate` may reject the change.
///
/// # Errors
/// `NotFound` when the record does not exist, `EditConflict` on a version
/// mismatch, plus whatever `mutate` or [`commit`] return.
pub async fn apply_update<R, S, F>(
    store: &S,
    id: i64,
    observed: Option<i32>,
    mutate: F,
) -> Result<R, ApiError>
where
    R: Versioned + Send + Sync,
    S: VersionedStore<R> + ?Sized,
    F: FnOnce(&mut R) -> Result<(), ApiError>,
{
    let mut record = store.fetch(id).await?;
    let current = record.version();

    if observed.is_some_and(|observed| observed != current) {
        debug!(id, current, ?observed, "stale version supplied");
        return Err(ApiError::EditConflict);
    }

    mutate(&mut record)?;
    commit(store, &mut record, current).await?;

    Ok(record)
}
