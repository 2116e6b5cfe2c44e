use crate::core::broker::DbBroker;
use crate::core::error::HivelogError;
use crate::core::schemas;
use crate::core::store::Store;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn db_connect(db_path: &str, busy_timeout_secs: u64) -> Result<Connection, HivelogError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(busy_timeout_secs))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

pub fn kernel_db_path(root: &Path) -> PathBuf {
    root.join(schemas::KERNEL_DB_NAME)
}

/// Create every kernel table if missing and stamp the schema version.
pub fn initialize_kernel_db(store: &Store) -> Result<(), HivelogError> {
    let broker = DbBroker::new(store);
    broker.with_conn("hivelog", "kernel.init", |conn| {
        conn.execute_batch(schemas::KERNEL_DB_SCHEMA)?;

        let current: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match current {
            None => {
                conn.execute(
                    "INSERT INTO meta(key, value) VALUES('schema_version', ?1)",
                    params![schemas::KERNEL_SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v.parse::<u32>().ok() == Some(schemas::KERNEL_SCHEMA_VERSION) => {}
            Some(v) => {
                return Err(HivelogError::StoreUnavailable(format!(
                    "unsupported schema_version '{}' (expected {})",
                    v,
                    schemas::KERNEL_SCHEMA_VERSION
                )));
            }
        }
        Ok(())
    })?;

    tracing::debug!(db = %store.db_path().display(), "kernel database initialized");
    Ok(())
}

pub fn schema_version(store: &Store) -> Result<Option<u32>, HivelogError> {
    DbBroker::new(store).with_conn("hivelog", "kernel.schema_version", |conn| {
        let v: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v.and_then(|s| s.parse().ok()))
    })
}
