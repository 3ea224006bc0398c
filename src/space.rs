use std::path::{Path, PathBuf};

use crate::error::{Result, SnapvaultError};
use crate::layout::{list_backups, lock_path, log_path, remove_tree, BackupLayout, BackupRecord};
use crate::lock::ReferenceLock;
use crate::util::paths::remove_file_if_exists;

pub trait CapacityProbe {
    /// Percentage of the filesystem holding `path` that is in use.
    fn used_percent(&self, path: &Path) -> Result<u32>;
}

pub struct StatvfsProbe;

impl CapacityProbe for StatvfsProbe {
    fn used_percent(&self, path: &Path) -> Result<u32> {
        let st = nix::sys::statvfs::statvfs(path)
            .map_err(|e| SnapvaultError::message(format!("statvfs {}: {}", path.display(), e)))?;
        Ok(percent_used(
            st.blocks() as u64,
            st.blocks_free() as u64,
            st.blocks_available() as u64,
        ))
    }
}

/// Used space as `df` reports it: blocks reserved for root are not counted
/// as available, and the result is rounded up.
pub fn percent_used(total: u64, free: u64, available: u64) -> u32 {
    let used = total.saturating_sub(free);
    let denom = used + available;
    if denom == 0 {
        return 0;
    }
    ((used * 100).div_ceil(denom)) as u32
}

#[derive(Debug, Default)]
pub struct SpaceReport {
    pub evicted: Vec<PathBuf>,
    pub capacity: u32,
}

pub struct SpaceManager {
    probe: Box<dyn CapacityProbe>,
    threshold: u32,
}

impl SpaceManager {
    pub fn new(probe: Box<dyn CapacityProbe>, threshold: u32) -> Self {
        Self { probe, threshold }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn capacity(&self, path: &Path) -> Result<u32> {
        self.probe.used_percent(path)
    }

    pub fn over_threshold(&self, path: &Path) -> Result<bool> {
        Ok(self.capacity(path)? > self.threshold)
    }

    /// Deletes backups of this host, oldest first, until the device is at or
    /// below the threshold or nothing is left to delete. Schedules and
    /// keep-counts are ignored. Backups locked by another process are skipped.
    pub fn recover_space(&self, layout: &BackupLayout) -> Result<SpaceReport> {
        let root = layout.root();
        let mut report = SpaceReport {
            evicted: Vec::new(),
            capacity: self.capacity(root)?,
        };
        if report.capacity <= self.threshold {
            return Ok(report);
        }
        tracing::warn!(
            capacity = report.capacity,
            threshold = self.threshold,
            "backup device over capacity; deleting oldest backups"
        );

        let mut candidates: Vec<(PathBuf, BackupRecord)> = Vec::new();
        for fs_dir in layout.filesystem_dirs()? {
            for record in list_backups(&fs_dir.path)? {
                candidates.push((fs_dir.path.clone(), record));
            }
        }
        candidates.sort_by(|a, b| a.1.mtime.cmp(&b.1.mtime).then_with(|| a.1.label.cmp(&b.1.label)));

        let mut candidates = candidates.into_iter();
        while report.capacity > self.threshold {
            let Some((fs_dir, record)) = candidates.next() else {
                break;
            };
            let Some(lock) = ReferenceLock::try_acquire(&lock_path(&fs_dir, &record.label))? else {
                tracing::warn!(backup = %record.path.display(), "backup in use; not deleting");
                continue;
            };
            remove_tree(&record.path)?;
            remove_file_if_exists(&log_path(&fs_dir, &record.label))?;
            lock.discard()?;
            tracing::info!(backup = %record.path.display(), "deleted to recover space");
            report.evicted.push(record.path);
            report.capacity = self.capacity(root)?;
        }
        if report.capacity > self.threshold {
            tracing::warn!(capacity = report.capacity, "no more backups to delete");
        }
        Ok(report)
    }
}
