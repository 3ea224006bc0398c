//! Persisted maintenance state.
//!
//! Entered when continuing could corrupt the incremental chain or touch data
//! outside the backup tree. Automatic runs refuse to start until an operator
//! clears it.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapvaultError};
use crate::util::paths::{ensure_private_dir, remove_file_if_exists};

const MAINTENANCE_FILE: &str = "maintenance.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub reason: String,
    pub since: String,
}

#[derive(Debug, Clone)]
pub struct Maintenance {
    path: PathBuf,
}

impl Maintenance {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(MAINTENANCE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn enter(&self, reason: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_private_dir(parent)?;
        }
        let record = MaintenanceRecord {
            reason: reason.to_string(),
            since: Local::now().to_rfc3339(),
        };
        let data = serde_yaml::to_string(&record)
            .map_err(|e| SnapvaultError::message(format!("encode maintenance state: {}", e)))?;
        fs::write(&self.path, data)
            .map_err(|e| SnapvaultError::message(format!("write {}: {}", self.path.display(), e)))?;
        tracing::error!(reason, "entered maintenance state; automatic backups disabled");
        Ok(())
    }

    pub fn current(&self) -> Result<Option<MaintenanceRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| SnapvaultError::message(format!("read {}: {}", self.path.display(), e)))?;
        let record = serde_yaml::from_str(&contents).unwrap_or_else(|_| MaintenanceRecord {
            reason: contents.trim().to_string(),
            since: String::new(),
        });
        Ok(Some(record))
    }

    /// Returns whether maintenance state was set.
    pub fn clear(&self) -> Result<bool> {
        let was_set = self.path.exists();
        remove_file_if_exists(&self.path)?;
        Ok(was_set)
    }
}
