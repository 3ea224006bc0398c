//! Cleanup after an ungraceful exit of a previous run.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::Result;
use crate::layout::{log_path, partial_path, remove_tree, list_partials, BackupLayout};
use crate::store::{SnapshotStore, PENDING};
use crate::types::SnapshotName;
use crate::util::paths::remove_file_if_exists;

#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Snapshots whose dangling hold was released.
    pub released: Vec<SnapshotName>,
    /// Partial transfers whose snapshot is no longer pending; deleted.
    pub zombies: Vec<PathBuf>,
    /// Partial transfers left in place for the next run to resume.
    pub resumable: Vec<PathBuf>,
}

/// Releases holds tagged `property` and removes orphaned partial transfers.
/// Holds placed by anything else are left alone.
pub fn recover(
    store: &mut dyn SnapshotStore,
    layout: &BackupLayout,
    property: &str,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    store.invalidate();
    for snapshot in store.held_snapshots()? {
        let holds = match store.holds(&snapshot) {
            Ok(holds) => holds,
            Err(err) => {
                tracing::warn!(snapshot = %snapshot, error = %err, "cannot list holds");
                continue;
            }
        };
        if !holds.iter().any(|tag| tag == property) {
            continue;
        }
        match store.release(&snapshot, property) {
            Ok(()) => {
                tracing::info!(snapshot = %snapshot, "released dangling hold");
                report.released.push(snapshot);
            }
            Err(err) => tracing::warn!(snapshot = %snapshot, error = %err, "cannot release hold"),
        }
    }

    let pending: HashSet<SnapshotName> = store
        .list_tagged(property, PENDING)?
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    for fs_dir in layout.filesystem_dirs()? {
        for label in list_partials(&fs_dir.path)? {
            let partial = partial_path(&fs_dir.path, &label);
            if pending.contains(&SnapshotName::new(fs_dir.fs.as_str(), label.as_str())) {
                tracing::info!(partial = %partial.display(), "partial transfer will be resumed");
                report.resumable.push(partial);
                continue;
            }
            remove_tree(&partial)?;
            remove_file_if_exists(&log_path(&fs_dir.path, &label))?;
            tracing::info!(partial = %partial.display(), "removed orphaned partial transfer");
            report.zombies.push(partial);
        }
    }
    store.invalidate();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeStore;
    use std::fs;
    use tempfile::TempDir;

    const PROP: &str = "org.snapvault:rsync-default";

    #[test]
    fn releases_only_own_holds() {
        let dir = TempDir::new().expect("tempdir");
        let layout = BackupLayout::new(dir.path(), "host");
        let store = FakeStore::default();
        store.add_snapshot("tank@a", 100, Some("pending"));
        store.add_snapshot("tank@b", 200, Some("completed"));
        store.add_snapshot("tank@c", 300, None);
        store.add_hold("tank@a", PROP);
        store.add_hold("tank@b", "keep");
        store.add_hold("tank@c", PROP);
        store.add_hold("tank@c", "org.other:tool");

        let mut handle = store.clone();
        let report = recover(&mut handle, &layout, PROP).unwrap();

        let released: Vec<String> = report.released.iter().map(|s| s.to_string()).collect();
        assert_eq!(released, vec!["tank@a", "tank@c"]);
        assert!(store.holds_of("tank@a").is_empty());
        assert_eq!(store.holds_of("tank@b"), vec!["keep"]);
        assert_eq!(store.holds_of("tank@c"), vec!["org.other:tool"]);
    }

    #[test]
    fn removes_zombie_partials_and_keeps_pending_ones() {
        let dir = TempDir::new().expect("tempdir");
        let layout = BackupLayout::new(dir.path(), "host");
        let fs_dir = layout.prepare_fs_dir("tank/home").unwrap();
        fs::create_dir_all(partial_path(&fs_dir, "snap-1").join("data")).unwrap();
        fs::create_dir_all(partial_path(&fs_dir, "snap-2")).unwrap();
        fs::write(log_path(&fs_dir, "snap-1"), "log").unwrap();
        fs::write(log_path(&fs_dir, "snap-2"), "log").unwrap();

        let store = FakeStore::default();
        store.add_snapshot("tank/home@snap-2", 200, Some("pending"));

        let mut handle = store.clone();
        let report = recover(&mut handle, &layout, PROP).unwrap();
        assert_eq!(report.zombies, vec![partial_path(&fs_dir, "snap-1")]);
        assert_eq!(report.resumable, vec![partial_path(&fs_dir, "snap-2")]);
        assert!(!partial_path(&fs_dir, "snap-1").exists());
        assert!(!log_path(&fs_dir, "snap-1").exists());
        assert!(partial_path(&fs_dir, "snap-2").exists());
        assert!(log_path(&fs_dir, "snap-2").exists());
    }
}
