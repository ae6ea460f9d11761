//! In-process store used for development and tests.
//!
//! One `RwLock` guards all tables: lookups share it, writes take it
//! exclusively, which makes the version check and the write a single step.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::{
    ConflictKind, CredentialStore, NewRecord, Record, RecordQuery, RecordStore, SortColumn,
    StoreError, StoreFuture, VersionedStore,
};
use crate::auth::{
    Identity, NewIdentity, Permissions, Scope, TokenRecord, permissions::PERMISSION_CODES,
};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, Identity>,
    tokens: Vec<TokenRecord>,
    // user id -> granted codes
    permissions: BTreeMap<i64, BTreeSet<String>>,
    records: BTreeMap<i64, Record>,
    // Ids are never reused, even after a delete.
    last_user_id: i64,
    last_record_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of token rows currently held, expired ones included.
    pub async fn token_count(&self) -> usize {
        self.tables.read().await.tokens.len()
    }
}

impl VersionedStore<Identity> for MemoryStore {
    fn fetch(&self, id: i64) -> StoreFuture<'_, Identity> {
        Box::pin(async move {
            self.tables
                .read()
                .await
                .users
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound)
        })
    }

    fn update_versioned<'a>(
        &'a self,
        record: &'a Identity,
        expected_version: i32,
    ) -> StoreFuture<'a, i32> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;

            if !tables
                .users
                .get(&record.id)
                .is_some_and(|stored| stored.version == expected_version)
            {
                return Err(StoreError::Conflict(ConflictKind::Edit));
            }

            if tables
                .users
                .values()
                .any(|user| user.id != record.id && user.email == record.email)
            {
                return Err(StoreError::Conflict(ConflictKind::Duplicate("email")));
            }

            let Some(stored) = tables.users.get_mut(&record.id) else {
                return Err(StoreError::Conflict(ConflictKind::Edit));
            };

            *stored = Identity {
                id: stored.id,
                created_at: stored.created_at,
                version: expected_version + 1,
                ..record.clone()
            };

            Ok(stored.version)
        })
    }
}

impl CredentialStore for MemoryStore {
    fn find_identity_by_token<'a>(
        &'a self,
        token_hash: &'a [u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Identity> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            tables
                .tokens
                .iter()
                .find(|token| {
                    token.hash.as_slice() == token_hash && token.scope == scope && token.expiry > now
                })
                .and_then(|token| tables.users.get(&token.user_id))
                .cloned()
                .ok_or(StoreError::NotFound)
        })
    }

    fn find_identity_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Identity> {
        Box::pin(async move {
            self.tables
                .read()
                .await
                .users
                .values()
                .find(|user| user.email == email)
                .cloned()
                .ok_or(StoreError::NotFound)
        })
    }

    fn insert_identity<'a>(&'a self, identity: &'a NewIdentity) -> StoreFuture<'a, Identity> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;

            if tables.users.values().any(|user| user.email == identity.email) {
                return Err(StoreError::Conflict(ConflictKind::Duplicate("email")));
            }

            tables.last_user_id += 1;
            let user = Identity {
                id: tables.last_user_id,
                created_at: Utc::now(),
                name: identity.name.clone(),
                email: identity.email.clone(),
                password_hash: identity.password_hash.clone(),
                activated: identity.activated,
                version: 1,
            };
            tables.users.insert(user.id, user.clone());

            Ok(user)
        })
    }

    fn insert_token<'a>(&'a self, token: &'a TokenRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;

            if !tables.users.contains_key(&token.user_id) {
                return Err(StoreError::Fault(anyhow::anyhow!(
                    "token references unknown user {}",
                    token.user_id
                )));
            }
            // Nothing reads an expired token again, so drop them on the way in.
            let now = Utc::now();
            tables.tokens.retain(|stored| stored.expiry > now);
            tables.tokens.push(token.clone());

            Ok(())
        })
    }

    fn delete_tokens(&self, scope: Scope, user_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.tables
                .write()
                .await
                .tokens
                .retain(|token| !(token.scope == scope && token.user_id == user_id));
            Ok(())
        })
    }

    fn permissions_for_user(&self, user_id: i64) -> StoreFuture<'_, Permissions> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(tables
                .permissions
                .get(&user_id)
                .map(|codes| codes.iter().map(String::as_str).collect())
                .unwrap_or_default())
        })
    }

    fn grant_permissions<'a>(&'a self, user_id: i64, codes: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;

            if !tables.users.contains_key(&user_id) {
                return Err(StoreError::Fault(anyhow::anyhow!(
                    "permission grant references unknown user {user_id}"
                )));
            }

            let granted = tables.permissions.entry(user_id).or_default();
            for code in codes.iter().copied().filter(|code| PERMISSION_CODES.contains(code)) {
                granted.insert(code.to_string());
            }

            Ok(())
        })
    }
}

impl VersionedStore<Record> for MemoryStore {
    fn fetch(&self, id: i64) -> StoreFuture<'_, Record> {
        Box::pin(async move {
            self.tables
                .read()
                .await
                .records
                .get(&id)
                .cloned()
                .ok_or(StoreError::NotFound)
        })
    }

    fn update_versioned<'a>(
        &'a self,
        record: &'a Record,
        expected_version: i32,
    ) -> StoreFuture<'a, i32> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;

            let stored = match tables.records.get_mut(&record.id) {
                Some(stored) if stored.version == expected_version => stored,
                _ => return Err(StoreError::Conflict(ConflictKind::Edit)),
            };

            *stored = Record {
                id: stored.id,
                created_at: stored.created_at,
                version: expected_version + 1,
                ..record.clone()
            };

            Ok(stored.version)
        })
    }
}

impl RecordStore for MemoryStore {
    fn insert_record<'a>(&'a self, record: &'a NewRecord) -> StoreFuture<'a, Record> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;

            tables.last_record_id += 1;
            let record = Record {
                id: tables.last_record_id,
                created_at: Utc::now(),
                title: record.title.clone(),
                body: record.body.clone(),
                category: record.category.clone(),
                version: 1,
            };
            tables.records.insert(record.id, record.clone());

            Ok(record)
        })
    }

    fn delete_record(&self, id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.tables
                .write()
                .await
                .records
                .remove(&id)
                .map(|_| ())
                .ok_or(StoreError::NotFound)
        })
    }

    fn list_records<'a>(&'a self, query: &'a RecordQuery) -> StoreFuture<'a, (Vec<Record>, u64)> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            let needle = query.title.to_lowercase();

            let mut matches: Vec<&Record> = tables
                .records
                .values()
                .filter(|record| needle.is_empty() || record.title.to_lowercase().contains(&needle))
                .collect();

            matches.sort_by(|a, b| {
                let ordering = match query.sort.column {
                    SortColumn::Id => a.id.cmp(&b.id),
                    SortColumn::Title => a.title.cmp(&b.title),
                    SortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
                };
                let ordering = if query.sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                ordering.then_with(|| a.id.cmp(&b.id))
            });

            let total = matches.len() as u64;
            let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
            let limit = usize::try_from(query.limit()).unwrap_or(0);
            let page = matches
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect();

            Ok((page, total))
        })
    }
}
