use chrono::{DateTime, Local};

use crate::config::model::RuntimeConfig;
use crate::error::Result;
use crate::store::{SnapshotStore, ZfsStore, PENDING};
use crate::types::{newest_first, PendingEntry};

pub fn list_pending(config: &RuntimeConfig) -> Result<()> {
    let mut store = ZfsStore::new();
    let mut entries = store.list_tagged(&config.property_name(), PENDING)?;
    entries.sort_by(newest_first);
    if entries.is_empty() {
        println!("no snapshots pending");
        return Ok(());
    }
    for entry in &entries {
        println!("{}", describe(entry));
    }
    println!("{} snapshot(s) pending", entries.len());
    Ok(())
}

fn describe(entry: &PendingEntry) -> String {
    let created = DateTime::from_timestamp(entry.ctime, 0)
        .map(|t| t.with_timezone(&Local).format("%d-%m-%Y %H:%M").to_string())
        .unwrap_or_else(|| entry.ctime.to_string());
    format!("{}  {}", created, entry.name)
}
