use crate::core::db;
use crate::core::error::HivelogError;
use crate::core::store::Store;
use crate::core::time;
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

/// The DB Broker is the "Thin Waist" for state access.
///
/// Writes run inside one IMMEDIATE transaction and are serialized per database
/// file by an in-process mutex; SQLite's own locking covers other processes.
/// Every brokered op appends one line to the audit log.
pub struct DbBroker {
    db_path: PathBuf,
    audit_log_path: PathBuf,
    busy_timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

fn write_lock_for(db_path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(
        map.entry(db_path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(()))),
    )
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

impl DbBroker {
    pub fn new(store: &Store) -> Self {
        Self {
            db_path: store.db_path(),
            audit_log_path: store.root.join(AUDIT_LOG_NAME),
            busy_timeout_secs: store.config.store.busy_timeout_secs,
        }
    }

    fn connect(&self) -> Result<Connection, HivelogError> {
        db::db_connect(&self.db_path.to_string_lossy(), self.busy_timeout_secs).map_err(|e| {
            match e {
                HivelogError::RusqliteError(inner) => HivelogError::StoreUnavailable(format!(
                    "cannot open {}: {}",
                    self.db_path.display(),
                    inner
                )),
                other => other,
            }
        })
    }

    /// Execute a closure with a plain connection. Used for reads and schema setup.
    pub fn with_conn<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, HivelogError>
    where
        F: FnOnce(&Connection) -> Result<R, HivelogError>,
    {
        let conn = self.connect()?;
        let result = f(&conn);
        self.finish(actor, op_name, &result);
        result
    }

    /// Execute a closure inside one write transaction.
    ///
    /// `Ok` commits, `Err` rolls back. A panic inside `f` drops the
    /// transaction, which also rolls back.
    pub fn with_tx<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, HivelogError>
    where
        F: FnOnce(&Connection) -> Result<R, HivelogError>,
    {
        let lock = write_lock_for(&self.db_path);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut conn = self.connect()?;
        let result = (|| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| {
                    HivelogError::StoreUnavailable(format!("cannot begin transaction: {}", e))
                })?;
            let value = f(&tx)?;
            tx.commit().map_err(|e| {
                if is_busy(&e) {
                    HivelogError::StoreUnavailable(format!("commit blocked: {}", e))
                } else {
                    HivelogError::StoreUnavailable(format!("commit failed: {}", e))
                }
            })?;
            Ok(value)
        })();

        self.finish(actor, op_name, &result);
        result
    }

    /// Record the outcome. The database result stands on its own: a failed
    /// audit write is logged and never turns a committed op into an error.
    fn finish<R>(&self, actor: &str, op: &str, result: &Result<R, HivelogError>) {
        let status = match result {
            Ok(_) => {
                tracing::debug!(actor, op, db = %self.db_id(), "brokered op committed");
                "success"
            }
            Err(e) => {
                tracing::debug!(actor, op, db = %self.db_id(), kind = e.kind(), error = %e, "brokered op failed");
                "error"
            }
        };
        if let Err(e) = self.log_event(actor, op, status) {
            tracing::warn!(
                actor,
                op,
                path = %self.audit_log_path.display(),
                error = %e,
                "audit append failed"
            );
        }
    }

    fn db_id(&self) -> String {
        self.db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<(), HivelogError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: self.db_id(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}

/// Read the broker audit trail back, oldest first. Malformed lines are skipped.
pub fn audit_log(store: &Store) -> Result<Vec<BrokerEvent>, HivelogError> {
    let path = store.root.join(AUDIT_LOG_NAME);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}
