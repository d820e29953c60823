//! SQLite schema versions.
//!
//! Every step in [`STEPS`] upgrades the schema by exactly one version. Steps
//! that have not run yet are applied in order inside a single transaction
//! and recorded in `schema_migrations`.

use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};

/// `(version, DDL)` pairs, oldest first.
const STEPS: &[(u32, &str)] = &[(
    1,
    r#"
    CREATE TABLE records (
        id         TEXT PRIMARY KEY,
        secret     TEXT NOT NULL,
        data       BLOB NOT NULL,
        version    INTEGER NOT NULL DEFAULT 0,
        destroyed  INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX idx_records_destroyed ON records(destroyed);
    "#,
)];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = 1;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )?;

    let installed = installed_version(conn)?;
    if installed > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "schema v{} is newer than this build (v{})",
            installed, CURRENT_VERSION
        )));
    }

    let pending: Vec<_> = STEPS.iter().filter(|(v, _)| *v > installed).collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, ddl) in pending {
        tx.execute_batch(ddl)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, now_millis()],
        )?;
        tracing::debug!(version, "schema upgraded");
    }
    tx.commit()?;
    Ok(())
}

fn installed_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

/// Milliseconds since the Unix epoch; 0 if the clock is before it.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
