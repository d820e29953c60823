//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. Record data is stored as a
//! CBOR blob.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use syncher_core::{Data, Record, RecordId, Secret};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{PutCondition, PutResult, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("sqlite connection: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn encode_data(data: &Data) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(data, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_data(bytes: &[u8]) -> Result<Data> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_sql_version(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| StoreError::InvalidData(format!("version {} out of range", version)))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, Vec<u8>, i64, bool)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn current_version(conn: &Connection, id: &str) -> Result<Option<u64>> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM records WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.map(|v| v as u64))
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let key = id.as_str().to_owned();

        let row = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT id, secret, data, version, destroyed FROM records WHERE id = ?1",
                    params![key],
                    row_to_record,
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;

        let Some((id, secret, data, version, destroyed)) = row else {
            return Ok(None);
        };

        if version < 0 {
            return Err(StoreError::InvalidData(format!(
                "negative version {} for record {}",
                version, id
            )));
        }

        Ok(Some(Record {
            id: RecordId::new(id),
            secret: Secret::new(secret),
            data: decode_data(&data)?,
            version: version as u64,
            destroyed,
        }))
    }

    async fn put(&self, record: &Record, condition: PutCondition) -> Result<PutResult> {
        let id = record.id.as_str().to_owned();
        let secret = record.secret.as_str().to_owned();
        let data = encode_data(&record.data)?;
        let version = to_sql_version(record.version)?;
        let destroyed = record.destroyed;
        let expected = match condition {
            PutCondition::IfVersion(v) => Some(to_sql_version(v)?),
            _ => None,
        };

        let result = self
            .blocking(move |conn| {
                let now = now_millis();

                match condition {
                    PutCondition::Always => {
                        conn.execute(
                            "INSERT INTO records (id, secret, data, version, destroyed, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                             ON CONFLICT(id) DO UPDATE SET
                                secret = excluded.secret,
                                data = excluded.data,
                                version = excluded.version,
                                destroyed = excluded.destroyed,
                                updated_at = excluded.updated_at",
                            params![id, secret, data, version, destroyed, now],
                        )?;
                        Ok(PutResult::Written)
                    }
                    PutCondition::IfAbsent => {
                        let inserted = conn.execute(
                            "INSERT OR IGNORE INTO records (id, secret, data, version, destroyed, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                            params![id, secret, data, version, destroyed, now],
                        )?;
                        Ok(if inserted == 1 {
                            PutResult::Written
                        } else {
                            PutResult::AlreadyExists
                        })
                    }
                    PutCondition::IfVersion(_) => {
                        let updated = conn.execute(
                            "UPDATE records
                             SET secret = ?2, data = ?3, version = ?4, destroyed = ?5, updated_at = ?6
                             WHERE id = ?1 AND version = ?7",
                            params![id, secret, data, version, destroyed, now, expected],
                        )?;
                        if updated == 1 {
                            Ok(PutResult::Written)
                        } else {
                            Ok(PutResult::VersionMismatch {
                                current: current_version(conn, &id)?,
                            })
                        }
                    }
                }
            })
            .await?;

        tracing::trace!(record_id = %record.id, version = record.version, ?result, "sqlite put");
        Ok(result)
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let key = id.as_str().to_owned();
        self.blocking(move |conn| {
            let removed = conn.execute("DELETE FROM records WHERE id = ?1", params![key])?;
            Ok(removed > 0)
        })
        .await
    }
}
