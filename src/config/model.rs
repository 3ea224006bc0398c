use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(rename = "targetDir")]
    pub target_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, rename = "labelPrefix", skip_serializing_if = "Option::is_none")]
    pub label_prefix: Option<String>,
    #[serde(default, rename = "capacityThreshold", skip_serializing_if = "Option::is_none")]
    pub capacity_threshold: Option<u32>,
    #[serde(default, rename = "stateDir", skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub rsync: RsyncOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules: Option<Vec<ScheduleConfig>>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RsyncOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, rename = "extraArgs", skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    #[serde(default, rename = "logFiles", skip_serializing_if = "Option::is_none")]
    pub log_files: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub name: String,
    pub keep: usize,
}

/// Validated configuration with defaults applied.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub target_dir: PathBuf,
    pub instance: String,
    pub hostname: String,
    pub label_prefix: String,
    pub capacity_threshold: u32,
    pub state_dir: PathBuf,
    pub verbose: bool,
    pub rsync_path: PathBuf,
    pub rsync_extra: Vec<String>,
    pub log_files: bool,
    pub schedules: Vec<ScheduleConfig>,
}

impl RuntimeConfig {
    /// Name of the snapshot property and hold tag owned by this instance.
    pub fn property_name(&self) -> String {
        format!("{}:rsync-{}", PROPERTY_BASE, self.instance)
    }

    pub fn instance_lock_path(&self) -> PathBuf {
        self.state_dir
            .join(format!("snapvault.{}.lock", self.instance))
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir
            .join(format!("status.{}.yaml", self.instance))
    }
}

pub const PROPERTY_BASE: &str = "org.snapvault";
