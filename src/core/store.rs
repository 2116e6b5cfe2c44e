//! Store abstraction for Hivelog's state management.
//!
//! A store is one on-disk workspace (`<project>/.hivelog/data/`) holding the
//! kernel database and the broker audit log. Inside a store, every row is
//! further partitioned by a caller-supplied `project_key`.

use crate::core::config::{self, KernelConfig};
use crate::core::db;
use crate::core::error::HivelogError;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const HIVELOG_DIR_NAME: &str = ".hivelog";
pub const HIVELOG_HOME_ENV: &str = "HIVELOG_HOME";

/// Store handle representing a Hivelog state workspace.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory (`.hivelog/data`).
    pub root: PathBuf,
    /// Kernel configuration resolved when the store was opened.
    pub config: KernelConfig,
}

impl Store {
    /// Open (and initialize if needed) the store for a project directory.
    ///
    /// `HIVELOG_HOME`, when set, replaces `<project_dir>/.hivelog` as the
    /// directory holding `config.toml` and `data/`.
    pub fn open(project_dir: &Path) -> Result<Self, HivelogError> {
        let hivelog_dir = match env::var(HIVELOG_HOME_ENV) {
            Ok(home) if !home.trim().is_empty() => PathBuf::from(home),
            Ok(_) | Err(env::VarError::NotPresent) => project_dir.join(HIVELOG_DIR_NAME),
            Err(e) => return Err(HivelogError::EnvVarError(e)),
        };
        let config = config::load_config(&hivelog_dir)?;
        Self::at(&hivelog_dir.join("data"), config)
    }

    /// Open a store rooted directly at `root` with an explicit config.
    pub fn at(root: &Path, config: KernelConfig) -> Result<Self, HivelogError> {
        config.validate()?;
        fs::create_dir_all(root)?;
        let store = Self {
            root: root.to_path_buf(),
            config,
        };
        db::initialize_kernel_db(&store)?;
        Ok(store)
    }

    pub fn db_path(&self) -> PathBuf {
        db::kernel_db_path(&self.root)
    }
}
