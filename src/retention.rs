use std::path::{Path, PathBuf};

use crate::config::model::ScheduleConfig;
use crate::error::Result;
use crate::layout::{
    list_backups, lock_path, log_path, move_tree, remove_tree, trash_log_path, trash_path,
    BackupLayout, BackupRecord, TRASH_DIR,
};
use crate::lock::ReferenceLock;
use crate::types::schedule_of;
use crate::util::paths::list_entries_if_exists;

/// Keeps each temporary schedule at its configured number of backups.
///
/// Expired backups are moved to the filesystem's trash directory rather than
/// deleted: another process may have picked one as its incremental reference
/// a moment ago. Trash is emptied at the start of the next full cycle.
pub struct RetentionManager {
    label_prefix: String,
    schedules: Vec<ScheduleConfig>,
}

impl RetentionManager {
    pub fn new(label_prefix: &str, schedules: &[ScheduleConfig]) -> Self {
        Self {
            label_prefix: label_prefix.to_string(),
            schedules: schedules.to_vec(),
        }
    }

    /// The schedule and keep-count governing `label`, if it belongs to a
    /// temporary schedule.
    pub fn policy_for<'a>(&self, label: &'a str) -> Option<(&'a str, usize)> {
        let schedule = schedule_of(label, &self.label_prefix)?;
        let keep = self
            .schedules
            .iter()
            .find(|s| s.name == schedule)
            .map(|s| s.keep)?;
        Some((schedule, keep))
    }

    /// Moves the oldest backups of `label`'s schedule to trash until at most
    /// `max(1, keep)` remain. Returns the backups moved.
    pub fn apply(&self, fs_dir: &Path, label: &str) -> Result<Vec<PathBuf>> {
        let Some((schedule, keep)) = self.policy_for(label) else {
            tracing::debug!(label, "archived snapshot; no retention");
            return Ok(Vec::new());
        };
        let floor = keep.max(1);
        let mut siblings: Vec<BackupRecord> = list_backups(fs_dir)?
            .into_iter()
            .filter(|r| schedule_of(&r.label, &self.label_prefix) == Some(schedule))
            .collect();
        if siblings.len() <= floor {
            return Ok(Vec::new());
        }
        siblings.sort_by(|a, b| a.mtime.cmp(&b.mtime).then_with(|| a.label.cmp(&b.label)));
        let excess = siblings.len() - floor;

        let mut moved = Vec::new();
        for record in siblings.into_iter().take(excess) {
            let Some(lock) = ReferenceLock::try_acquire(&lock_path(fs_dir, &record.label))? else {
                tracing::warn!(backup = %record.path.display(), "backup in use; expiring later");
                continue;
            };
            move_tree(&record.path, &trash_path(fs_dir, &record.label))?;
            let log = log_path(fs_dir, &record.label);
            if log.exists() {
                move_tree(&log, &trash_log_path(fs_dir, &record.label))?;
            }
            lock.release();
            tracing::info!(backup = %record.path.display(), schedule, keep, "expired backup moved to trash");
            moved.push(record.path);
        }
        Ok(moved)
    }

    /// Physically deletes trashed backups that nobody holds a lock on.
    pub fn purge_trash(&self, layout: &BackupLayout) -> Result<usize> {
        let mut purged = 0;
        for fs_dir in layout.filesystem_dirs()? {
            let trash = fs_dir.path.join(TRASH_DIR);
            for name in list_entries_if_exists(&trash)? {
                let path = trash.join(&name);
                if !path.is_dir() {
                    remove_tree(&path)?;
                    continue;
                }
                let Some(lock) = ReferenceLock::try_acquire(&lock_path(&fs_dir.path, &name))? else {
                    tracing::debug!(path = %path.display(), "trash entry in use; keeping");
                    continue;
                };
                remove_tree(&path)?;
                lock.discard()?;
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!(purged, "emptied trash");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::make_backup;
    use std::fs;
    use tempfile::TempDir;

    fn hourly(n: u32) -> String {
        format!("zfs-auto-snap_hourly-2024-01-01-{:02}h00", n)
    }

    fn manager(keep: usize) -> RetentionManager {
        RetentionManager::new(
            "zfs-auto-snap",
            &[ScheduleConfig {
                name: "hourly".to_string(),
                keep,
            }],
        )
    }

    #[test]
    fn moves_oldest_excess_to_trash() {
        let dir = TempDir::new().expect("tempdir");
        let layout = BackupLayout::new(dir.path(), "host");
        let fs_dir = layout.prepare_fs_dir("tank").unwrap();
        for n in 1..=4 {
            make_backup(&fs_dir, &hourly(n), 1000 + n as i64);
        }
        fs::write(log_path(&fs_dir, &hourly(1)), "log").unwrap();
        make_backup(&fs_dir, "zfs-auto-snap_daily-2024-01-01-00h00", 10);

        let moved = manager(3).apply(&fs_dir, &hourly(4)).unwrap();
        assert_eq!(moved, vec![fs_dir.join(hourly(1))]);
        assert!(trash_path(&fs_dir, &hourly(1)).is_dir());
        assert!(trash_log_path(&fs_dir, &hourly(1)).is_file());
        assert!(fs_dir.join("zfs-auto-snap_daily-2024-01-01-00h00").is_dir());
        assert_eq!(list_backups(&fs_dir).unwrap().len(), 4);
    }

    #[test]
    fn never_below_one() {
        let dir = TempDir::new().expect("tempdir");
        let layout = BackupLayout::new(dir.path(), "host");
        let fs_dir = layout.prepare_fs_dir("tank").unwrap();
        make_backup(&fs_dir, &hourly(1), 1001);
        assert!(manager(0).apply(&fs_dir, &hourly(1)).unwrap().is_empty());
        make_backup(&fs_dir, &hourly(2), 1002);
        make_backup(&fs_dir, &hourly(3), 1003);
        let moved = manager(0).apply(&fs_dir, &hourly(3)).unwrap();
        assert_eq!(moved.len(), 2);
        let left: Vec<String> = list_backups(&fs_dir)
            .unwrap()
            .into_iter()
            .map(|r| r.label)
            .collect();
        assert_eq!(left, vec![hourly(3)]);
    }

    #[test]
    fn archived_and_unknown_schedules_are_kept() {
        let dir = TempDir::new().expect("tempdir");
        let layout = BackupLayout::new(dir.path(), "host");
        let fs_dir = layout.prepare_fs_dir("tank").unwrap();
        for n in 1..=3 {
            make_backup(&fs_dir, &format!("manual-{}", n), n as i64);
        }
        assert!(manager(1).apply(&fs_dir, "manual-3").unwrap().is_empty());
        let weekly = "zfs-auto-snap_weekly-2024-01-01-00h00";
        assert!(manager(1).policy_for(weekly).is_none());
        assert_eq!(manager(5).policy_for(&hourly(1)), Some(("hourly", 5)));
    }

    #[test]
    fn locked_backup_is_not_moved() {
        let dir = TempDir::new().expect("tempdir");
        let layout = BackupLayout::new(dir.path(), "host");
        let fs_dir = layout.prepare_fs_dir("tank").unwrap();
        make_backup(&fs_dir, &hourly(1), 1001);
        make_backup(&fs_dir, &hourly(2), 1002);
        let held = ReferenceLock::try_acquire(&lock_path(&fs_dir, &hourly(1)))
            .unwrap()
            .unwrap();
        assert!(manager(1).apply(&fs_dir, &hourly(2)).unwrap().is_empty());
        assert!(fs_dir.join(hourly(1)).is_dir());
        drop(held);
    }

    #[test]
    fn purge_respects_locks() {
        let dir = TempDir::new().expect("tempdir");
        let layout = BackupLayout::new(dir.path(), "host");
        let fs_dir = layout.prepare_fs_dir("tank").unwrap();
        fs::create_dir_all(trash_path(&fs_dir, "old-1").join("data")).unwrap();
        fs::create_dir_all(trash_path(&fs_dir, "old-2")).unwrap();
        fs::write(trash_log_path(&fs_dir, "old-1"), "log").unwrap();
        let held = ReferenceLock::try_acquire(&lock_path(&fs_dir, "old-2"))
            .unwrap()
            .unwrap();

        let purged = manager(1).purge_trash(&layout).unwrap();
        assert_eq!(purged, 1);
        assert!(!trash_path(&fs_dir, "old-1").exists());
        assert!(!trash_log_path(&fs_dir, "old-1").exists());
        assert!(trash_path(&fs_dir, "old-2").exists());
        drop(held);
        assert_eq!(manager(1).purge_trash(&layout).unwrap(), 1);
    }
}
