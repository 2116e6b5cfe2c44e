use rusqlite;
use std::env;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HivelogError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] env::VarError),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Duplicate action: {0}")]
    DuplicateAction(String),
    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),
}

impl HivelogError {
    /// Stable error category used by JSON envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            HivelogError::ValidationError(_)
            | HivelogError::ConfigError(_)
            | HivelogError::EnvVarError(_) => "validation",
            HivelogError::Conflict(_) => "conflict",
            HivelogError::NotFound(_) => "not_found",
            HivelogError::DuplicateAction(_) => "duplicate_action",
            HivelogError::RusqliteError(_)
            | HivelogError::StoreUnavailable(_)
            | HivelogError::IoError(_)
            | HivelogError::JsonError(_)
            | HivelogError::CorruptCheckpoint(_) => "store",
        }
    }

    /// True when the failure happened before any write was attempted.
    pub fn is_retryable_after_fix(&self) -> bool {
        matches!(
            self,
            HivelogError::ValidationError(_)
                | HivelogError::ConfigError(_)
                | HivelogError::Conflict(_)
        )
    }
}
