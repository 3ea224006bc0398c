use crate::config::model::RuntimeConfig;
use crate::error::Result;
use crate::layout::{list_backups, BackupLayout};
use crate::maintenance::Maintenance;
use crate::space::{CapacityProbe, StatvfsProbe};
use crate::status::StatusFile;

pub fn show_status(config: &RuntimeConfig) -> Result<()> {
    match Maintenance::new(&config.state_dir).current()? {
        Some(record) => println!("maintenance: since {}: {}", record.since, record.reason),
        None => println!("maintenance: no"),
    }

    match StatusFile::read(&config.status_path())? {
        Some(record) => {
            let mut line = format!("last status: {:?} at {}", record.state, record.updated);
            if let Some(snapshot) = &record.snapshot {
                line.push_str(&format!(", snapshot {}", snapshot));
            }
            if let Some(remaining) = record.remaining {
                line.push_str(&format!(", {} remaining", remaining));
            }
            if let Some(pending) = record.pending {
                line.push_str(&format!(", {} pending", pending));
            }
            println!("{}", line);
        }
        None => println!("last status: none"),
    }

    if !config.target_dir.is_dir() {
        println!("backup device: {} not accessible", config.target_dir.display());
        return Ok(());
    }
    let used = StatvfsProbe.used_percent(&config.target_dir)?;
    println!(
        "backup device: {} {}% used (threshold {}%)",
        config.target_dir.display(),
        used,
        config.capacity_threshold
    );
    let layout = BackupLayout::new(&config.target_dir, &config.hostname);
    for fs_dir in layout.filesystem_dirs()? {
        let backups = list_backups(&fs_dir.path)?;
        let newest = backups
            .iter()
            .max_by_key(|r| r.mtime)
            .map(|r| r.label.as_str())
            .unwrap_or("-");
        println!("  {}: {} backup(s), newest {}", fs_dir.fs, backups.len(), newest);
    }
    Ok(())
}
