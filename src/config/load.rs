use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use crate::config::model::{Config, RuntimeConfig, ScheduleConfig};
use crate::error::{ConfigError, Result, SnapvaultError};
use crate::util::paths::is_safe_name;

const DEFAULT_INSTANCE: &str = "default";
const DEFAULT_LABEL_PREFIX: &str = "zfs-auto-snap";
const DEFAULT_CAPACITY_THRESHOLD: u32 = 90;
const DEFAULT_STATE_DIR: &str = "/var/lib/snapvault";
const DEFAULT_RSYNC: &str = "/usr/bin/rsync";

pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let mut contents = String::new();
    File::open(path)
        .map_err(SnapvaultError::Io)?
        .read_to_string(&mut contents)
        .map_err(SnapvaultError::Io)?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<RuntimeConfig> {
    let cfg: Config =
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    parse_runtime(cfg)
}

pub fn default_schedules() -> Vec<ScheduleConfig> {
    [
        ("frequent", 4),
        ("hourly", 24),
        ("daily", 31),
        ("weekly", 7),
        ("monthly", 12),
    ]
    .into_iter()
    .map(|(name, keep)| ScheduleConfig {
        name: name.to_string(),
        keep,
    })
    .collect()
}

fn parse_runtime(cfg: Config) -> Result<RuntimeConfig> {
    let target = cfg.target_dir.trim();
    if target.is_empty() {
        return Err(ConfigError::Invalid("targetDir is empty".to_string()).into());
    }
    let target_dir = PathBuf::from(target);
    if !target_dir.is_absolute() {
        return Err(ConfigError::Invalid("targetDir must be absolute".to_string()).into());
    }
    if target_dir
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ConfigError::Invalid("targetDir must not contain ..".to_string()).into());
    }

    let instance = cfg
        .instance
        .unwrap_or_else(|| DEFAULT_INSTANCE.to_string());
    if !is_safe_name(&instance) {
        return Err(ConfigError::Invalid(format!(
            "instance {} must use only letters, digits, '.', '-', '_'",
            instance
        ))
        .into());
    }

    let hostname = match cfg.hostname {
        Some(name) => name,
        None => hostname::get()
            .map_err(|e| SnapvaultError::message(format!("hostname: {}", e)))?
            .to_string_lossy()
            .to_string(),
    };
    if !is_safe_name(&hostname) {
        return Err(ConfigError::Invalid(format!(
            "hostname {} must use only letters, digits, '.', '-', '_'",
            hostname
        ))
        .into());
    }

    let capacity_threshold = cfg
        .capacity_threshold
        .unwrap_or(DEFAULT_CAPACITY_THRESHOLD);
    if capacity_threshold == 0 || capacity_threshold > 100 {
        return Err(ConfigError::Invalid(format!(
            "capacityThreshold {} must be between 1 and 100",
            capacity_threshold
        ))
        .into());
    }

    let schedules = cfg.schedules.unwrap_or_else(default_schedules);
    let mut names = HashSet::new();
    for schedule in &schedules {
        if schedule.name.trim().is_empty() {
            return Err(ConfigError::Invalid("schedule name is required".to_string()).into());
        }
        if !names.insert(schedule.name.clone()) {
            return Err(
                ConfigError::Invalid(format!("duplicate schedule {}", schedule.name)).into(),
            );
        }
    }

    Ok(RuntimeConfig {
        target_dir,
        instance,
        hostname,
        label_prefix: cfg
            .label_prefix
            .unwrap_or_else(|| DEFAULT_LABEL_PREFIX.to_string()),
        capacity_threshold,
        state_dir: PathBuf::from(
            cfg.state_dir
                .unwrap_or_else(|| DEFAULT_STATE_DIR.to_string()),
        ),
        verbose: cfg.verbose,
        rsync_path: PathBuf::from(
            cfg.rsync
                .path
                .unwrap_or_else(|| DEFAULT_RSYNC.to_string()),
        ),
        rsync_extra: cfg.rsync.extra_args,
        log_files: cfg.rsync.log_files.unwrap_or(true),
        schedules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_config_with_defaults() {
        let mut file = NamedTempFile::new().expect("tempfile");
        let yaml = r#"
targetDir: "/media/backup"
hostname: "workstation"
"#;
        file.write_all(yaml.as_bytes()).expect("write");
        let cfg = load_config(file.path()).expect("load");
        assert_eq!(cfg.target_dir, PathBuf::from("/media/backup"));
        assert_eq!(cfg.instance, "default");
        assert_eq!(cfg.capacity_threshold, 90);
        let hourly = cfg.schedules.iter().find(|s| s.name == "hourly");
        assert_eq!(hourly.map(|s| s.keep), Some(24));
        assert!(!cfg.schedules.iter().any(|s| s.name == "yearly"));
        assert!(cfg.log_files);
        assert_eq!(cfg.property_name(), "org.snapvault:rsync-default");
    }

    #[test]
    fn load_config_with_schedules() {
        let yaml = r#"
targetDir: "/media/backup"
instance: "usb"
hostname: "workstation"
capacityThreshold: 80
rsync:
  path: "/opt/bin/rsync"
  extraArgs: ["--numeric-ids"]
  logFiles: false
schedules:
  - name: "hourly"
    keep: 3
"#;
        let cfg = parse_config(yaml).expect("parse");
        assert_eq!(cfg.capacity_threshold, 80);
        assert_eq!(cfg.rsync_path, PathBuf::from("/opt/bin/rsync"));
        assert_eq!(cfg.rsync_extra, vec!["--numeric-ids".to_string()]);
        assert!(!cfg.log_files);
        assert_eq!(
            cfg.schedules,
            vec![ScheduleConfig {
                name: "hourly".to_string(),
                keep: 3,
            }]
        );
        assert_eq!(
            cfg.instance_lock_path(),
            PathBuf::from("/var/lib/snapvault/snapvault.usb.lock")
        );
    }

    #[test]
    fn reject_invalid_config() {
        assert!(parse_config("targetDir: \"relative/dir\"\nhostname: h\n").is_err());
        assert!(parse_config("targetDir: \"/a/../b\"\nhostname: h\n").is_err());
        assert!(parse_config("targetDir: \"/a\"\nhostname: h\ncapacityThreshold: 0\n").is_err());
        assert!(parse_config("targetDir: \"/a\"\nhostname: h\ninstance: \"a/b\"\n").is_err());
        let dup = r#"
targetDir: "/a"
hostname: h
schedules:
  - name: daily
    keep: 1
  - name: daily
    keep: 2
"#;
        assert!(parse_config(dup).is_err());
    }
}
