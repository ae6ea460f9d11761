//! PostgreSQL store.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
};
use std::time::Duration;
use tracing::{Instrument, Span, info_span};

use super::{
    ConflictKind, CredentialStore, NewRecord, Record, RecordQuery, RecordStore, StoreError,
    StoreFuture, VersionedStore,
};
use crate::auth::{Identity, NewIdentity, Permissions, Scope, TokenRecord};

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const USER_COLUMNS: &str = "users.id, users.created_at, users.name, users.email, \
                            users.password_hash, users.activated, users.version";

const RECORD_COLUMNS: &str = "id, created_at, title, body, category, version";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable or the schema cannot be applied.
    pub async fn connect(dsn: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(25)
            .max_lifetime(Duration::from_secs(60 * 2))
            .acquire_timeout(acquire_timeout)
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .instrument(db_span("CREATE", "schema.sql"))
            .await
            .context("Failed to apply database schema")?;

        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Column behind a SQLSTATE 23505, mapped from the violated constraint.
fn unique_violation_field(err: &sqlx::Error) -> Option<&'static str> {
    match err {
        sqlx::Error::Database(db_err)
            if db_err.code().is_some_and(|code| code.as_ref() == "23505") =>
        {
            Some(match db_err.constraint() {
                Some("users_email_key") => "email",
                _ => "value",
            })
        }
        _ => None,
    }
}

fn store_error(err: sqlx::Error, context: &'static str) -> StoreError {
    if let Some(field) = unique_violation_field(&err) {
        return StoreError::Conflict(ConflictKind::Duplicate(field));
    }
    StoreError::Fault(anyhow::Error::new(err).context(context))
}

fn identity_from_row(row: &PgRow) -> Result<Identity, sqlx::Error> {
    Ok(Identity {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        activated: row.try_get("activated")?,
        version: row.try_get("version")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<Record, sqlx::Error> {
    Ok(Record {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        category: row.try_get("category")?,
        version: row.try_get("version")?,
    })
}

impl PgStore {
    async fn fetch_identity(&self, query: &str, bind: IdentityKey<'_>) -> Result<Identity, StoreError> {
        let statement = sqlx::query(query);
        let statement = match bind {
            IdentityKey::Id(id) => statement.bind(id),
            IdentityKey::Email(email) => statement.bind(email),
        };
        let row = statement
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .map_err(|err| store_error(err, "failed to lookup user"))?
            .ok_or(StoreError::NotFound)?;

        identity_from_row(&row).map_err(|err| store_error(err, "failed to decode user"))
    }
}

enum IdentityKey<'a> {
    Id(i64),
    Email(&'a str),
}

impl VersionedStore<Identity> for PgStore {
    fn fetch(&self, id: i64) -> StoreFuture<'_, Identity> {
        Box::pin(async move {
            let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
            self.fetch_identity(&query, IdentityKey::Id(id)).await
        })
    }

    fn update_versioned<'a>(
        &'a self,
        record: &'a Identity,
        expected_version: i32,
    ) -> StoreFuture<'a, i32> {
        Box::pin(async move {
            let query = r"
                UPDATE users
                SET name = $1, email = $2, password_hash = $3, activated = $4, version = version + 1
                WHERE id = $5 AND version = $6
                RETURNING version
            ";
            let row = sqlx::query(query)
                .bind(&record.name)
                .bind(&record.email)
                .bind(&record.password_hash)
                .bind(record.activated)
                .bind(record.id)
                .bind(expected_version)
                .fetch_optional(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .map_err(|err| store_error(err, "failed to update user"))?;

            // No row: the version moved on (or the row vanished) since the read.
            let row = row.ok_or(StoreError::Conflict(ConflictKind::Edit))?;
            row.try_get("version")
                .map_err(|err| store_error(err, "failed to decode user version"))
        })
    }
}

impl CredentialStore for PgStore {
    fn find_identity_by_token<'a>(
        &'a self,
        token_hash: &'a [u8],
        scope: Scope,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Identity> {
        Box::pin(async move {
            let query = format!(
                "SELECT {USER_COLUMNS} FROM users \
                 INNER JOIN tokens ON users.id = tokens.user_id \
                 WHERE tokens.hash = $1 AND tokens.scope = $2 AND tokens.expiry > $3"
            );
            let row = sqlx::query(&query)
                .bind(token_hash)
                .bind(scope.as_str())
                .bind(now)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", &query))
                .await
                .map_err(|err| store_error(err, "failed to lookup user by token"))?
                .ok_or(StoreError::NotFound)?;

            identity_from_row(&row).map_err(|err| store_error(err, "failed to decode user"))
        })
    }

    fn find_identity_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Identity> {
        Box::pin(async move {
            let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
            self.fetch_identity(&query, IdentityKey::Email(email)).await
        })
    }

    fn insert_identity<'a>(&'a self, identity: &'a NewIdentity) -> StoreFuture<'a, Identity> {
        Box::pin(async move {
            let query = r"
                INSERT INTO users
                    (name, email, password_hash, activated)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at, name, email, password_hash, activated, version
            ";
            let row = sqlx::query(query)
                .bind(&identity.name)
                .bind(&identity.email)
                .bind(&identity.password_hash)
                .bind(identity.activated)
                .fetch_one(&self.pool)
                .instrument(db_span("INSERT", query))
                .await
                .map_err(|err| store_error(err, "failed to insert user"))?;

            identity_from_row(&row).map_err(|err| store_error(err, "failed to decode user"))
        })
    }

    fn insert_token<'a>(&'a self, token: &'a TokenRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = r"
                INSERT INTO tokens
                    (hash, user_id, expiry, scope)
                VALUES ($1, $2, $3, $4)
            ";
            sqlx::query(query)
                .bind(token.hash.as_slice())
                .bind(token.user_id)
                .bind(token.expiry)
                .bind(token.scope.as_str())
                .execute(&self.pool)
                .instrument(db_span("INSERT", query))
                .await
                .map_err(|err| store_error(err, "failed to insert token"))?;
            Ok(())
        })
    }

    fn delete_tokens(&self, scope: Scope, user_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let query = "DELETE FROM tokens WHERE scope = $1 AND user_id = $2";
            sqlx::query(query)
                .bind(scope.as_str())
                .bind(user_id)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .map_err(|err| store_error(err, "failed to delete tokens"))?;
            Ok(())
        })
    }

    fn permissions_for_user(&self, user_id: i64) -> StoreFuture<'_, Permissions> {
        Box::pin(async move {
            let query = r"
                SELECT permissions.code
                FROM permissions
                INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
                WHERE users_permissions.user_id = $1
                ORDER BY permissions.code
            ";
            let rows = sqlx::query(query)
                .bind(user_id)
                .fetch_all(&self.pool)
                .instrument(db_span("SELECT", query))
                .await
                .map_err(|err| store_error(err, "failed to lookup permissions"))?;

            rows.iter()
                .map(|row| row.try_get::<String, _>("code"))
                .collect::<Result<Vec<_>, _>>()
                .map(Permissions::from)
                .map_err(|err| store_error(err, "failed to decode permission code"))
        })
    }

    fn grant_permissions<'a>(&'a self, user_id: i64, codes: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let query = r"
                INSERT INTO users_permissions (user_id, permission_id)
                SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
                ON CONFLICT DO NOTHING
            ";
            sqlx::query(query)
                .bind(user_id)
                .bind(codes)
                .execute(&self.pool)
                .instrument(db_span("INSERT", query))
                .await
                .map_err(|err| store_error(err, "failed to grant permissions"))?;
            Ok(())
        })
    }
}

impl VersionedStore<Record> for PgStore {
    fn fetch(&self, id: i64) -> StoreFuture<'_, Record> {
        Box::pin(async move {
            let query = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = $1");
            let row = sqlx::query(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT", &query))
                .await
                .map_err(|err| store_error(err, "failed to lookup record"))?
                .ok_or(StoreError::NotFound)?;

            record_from_row(&row).map_err(|err| store_error(err, "failed to decode record"))
        })
    }

    fn update_versioned<'a>(
        &'a self,
        record: &'a Record,
        expected_version: i32,
    ) -> StoreFuture<'a, i32> {
        Box::pin(async move {
            let query = r"
                UPDATE records
                SET title = $1, body = $2, category = $3, version = version + 1
                WHERE id = $4 AND version = $5
                RETURNING version
            ";
            let row = sqlx::query(query)
                .bind(&record.title)
                .bind(&record.body)
                .bind(&record.category)
                .bind(record.id)
                .bind(expected_version)
                .fetch_optional(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .map_err(|err| store_error(err, "failed to update record"))?;

            let row = row.ok_or(StoreError::Conflict(ConflictKind::Edit))?;
            row.try_get("version")
                .map_err(|err| store_error(err, "failed to decode record version"))
        })
    }
}

impl RecordStore for PgStore {
    fn insert_record<'a>(&'a self, record: &'a NewRecord) -> StoreFuture<'a, Record> {
        Box::pin(async move {
            let query = format!(
                "INSERT INTO records (title, body, category) VALUES ($1, $2, $3) \
                 RETURNING {RECORD_COLUMNS}"
            );
            let row = sqlx::query(&query)
                .bind(&record.title)
                .bind(&record.body)
                .bind(&record.category)
                .fetch_one(&self.pool)
                .instrument(db_span("INSERT", &query))
                .await
                .map_err(|err| store_error(err, "failed to insert record"))?;

            record_from_row(&row).map_err(|err| store_error(err, "failed to decode record"))
        })
    }

    fn delete_record(&self, id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let query = "DELETE FROM records WHERE id = $1";
            let result = sqlx::query(query)
                .bind(id)
                .execute(&self.pool)
                .instrument(db_span("DELETE", query))
                .await
                .map_err(|err| store_error(err, "failed to delete record"))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    fn list_records<'a>(&'a self, query: &'a RecordQuery) -> StoreFuture<'a, (Vec<Record>, u64)> {
        Box::pin(async move {
            // Sort column and direction come from a closed enum, never from input text.
            let statement = format!(
                "SELECT count(*) OVER() AS total, {RECORD_COLUMNS} FROM records \
                 WHERE ($1 = '' OR strpos(lower(title), lower($1)) > 0) \
                 ORDER BY {} {}, id ASC \
                 LIMIT $2 OFFSET $3",
                query.sort.column.as_sql(),
                query.sort.direction()
            );
            let rows = sqlx::query(&statement)
                .bind(&query.title)
                .bind(query.limit())
                .bind(query.offset())
                .fetch_all(&self.pool)
                .instrument(db_span("SELECT", &statement))
                .await
                .map_err(|err| store_error(err, "failed to list records"))?;

            let mut total: i64 = 0;
            let mut records = Vec::with_capacity(rows.len());
            for row in &rows {
                total = row
                    .try_get("total")
                    .map_err(|err| store_error(err, "failed to decode record count"))?;
                records.push(
                    record_from_row(row).map_err(|err| store_error(err, "failed to decode record"))?,
                );
            }

            Ok((records, u64::try_from(total).unwrap_or_default()))
        })
    }
}
