//! Best-effort status notifications.
//!
//! Nothing here can fail a backup: delivery problems are logged and dropped.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapvaultError};
use crate::types::SnapshotName;

pub trait StatusBus {
    fn backup_started(&self, target: &Path);
    fn backup_progress(&self, snapshot: &SnapshotName, remaining: usize);
    fn backup_complete(&self, target: &Path);
    fn in_sync(&self);
    fn out_of_sync(&self, pending: usize);
}

/// Emits each notification as a structured log event.
pub struct LogBus;

impl StatusBus for LogBus {
    fn backup_started(&self, target: &Path) {
        tracing::info!(target: "snapvault::status", target_dir = %target.display(), "backup started");
    }

    fn backup_progress(&self, snapshot: &SnapshotName, remaining: usize) {
        tracing::info!(target: "snapvault::status", snapshot = %snapshot, remaining, "backing up");
    }

    fn backup_complete(&self, target: &Path) {
        tracing::info!(target: "snapvault::status", target_dir = %target.display(), "backup complete");
    }

    fn in_sync(&self) {
        tracing::info!(target: "snapvault::status", "in sync");
    }

    fn out_of_sync(&self, pending: usize) {
        tracing::info!(target: "snapvault::status", pending, "out of sync");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Started,
    Progress,
    Complete,
    Synced,
    Unsynced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: SyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<usize>,
    pub updated: String,
}

impl StatusRecord {
    fn new(state: SyncState) -> Self {
        Self {
            state,
            target: None,
            snapshot: None,
            remaining: None,
            pending: None,
            updated: Local::now().to_rfc3339(),
        }
    }
}

/// Keeps the latest notification in a YAML file for desktop tools to poll.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn read(path: &Path) -> Result<Option<StatusRecord>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| SnapvaultError::message(format!("read {}: {}", path.display(), e)))?;
        serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|e| SnapvaultError::message(format!("parse {}: {}", path.display(), e)))
    }

    fn publish(&self, record: StatusRecord) {
        let data = match serde_yaml::to_string(&record) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "encode status");
                return;
            }
        };
        let tmp = self.path.with_extension("tmp");
        let result = fs::write(&tmp, data).and_then(|_| fs::rename(&tmp, &self.path));
        if let Err(err) = result {
            tracing::warn!(path = %self.path.display(), error = %err, "write status");
        }
    }
}

impl StatusBus for StatusFile {
    fn backup_started(&self, target: &Path) {
        let mut record = StatusRecord::new(SyncState::Started);
        record.target = Some(target.display().to_string());
        self.publish(record);
    }

    fn backup_progress(&self, snapshot: &SnapshotName, remaining: usize) {
        let mut record = StatusRecord::new(SyncState::Progress);
        record.snapshot = Some(snapshot.to_string());
        record.remaining = Some(remaining);
        self.publish(record);
    }

    fn backup_complete(&self, target: &Path) {
        let mut record = StatusRecord::new(SyncState::Complete);
        record.target = Some(target.display().to_string());
        self.publish(record);
    }

    fn in_sync(&self) {
        self.publish(StatusRecord::new(SyncState::Synced));
    }

    fn out_of_sync(&self, pending: usize) {
        let mut record = StatusRecord::new(SyncState::Unsynced);
        record.pending = Some(pending);
        self.publish(record);
    }
}

/// Delivers every notification to each bus in turn.
pub struct Fanout(pub Vec<Box<dyn StatusBus>>);

impl StatusBus for Fanout {
    fn backup_started(&self, target: &Path) {
        self.0.iter().for_each(|bus| bus.backup_started(target));
    }

    fn backup_progress(&self, snapshot: &SnapshotName, remaining: usize) {
        self.0
            .iter()
            .for_each(|bus| bus.backup_progress(snapshot, remaining));
    }

    fn backup_complete(&self, target: &Path) {
        self.0.iter().for_each(|bus| bus.backup_complete(target));
    }

    fn in_sync(&self) {
        self.0.iter().for_each(|bus| bus.in_sync());
    }

    fn out_of_sync(&self, pending: usize) {
        self.0.iter().for_each(|bus| bus.out_of_sync(pending));
    }
}
