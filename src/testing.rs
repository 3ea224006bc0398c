//! In-memory stand-ins shared by the unit tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use filetime::{set_file_times, FileTime};

use crate::config::load::default_schedules;
use crate::config::model::{RuntimeConfig, ScheduleConfig};
use crate::error::{Result, StoreError};
use crate::layout::{list_backups, BackupLayout};
use crate::space::CapacityProbe;
use crate::status::StatusBus;
use crate::store::SnapshotStore;
use crate::transfer::{Replicator, TransferRequest};
use crate::types::{PendingEntry, SnapshotName};

fn name(s: &str) -> SnapshotName {
    s.parse().expect("snapshot name")
}

/// A backup directory with one file, stamped with `mtime`.
pub fn make_backup(fs_dir: &Path, label: &str, mtime: i64) -> PathBuf {
    let path = fs_dir.join(label);
    fs::create_dir_all(&path).expect("create backup");
    fs::write(path.join("data"), label).expect("write backup");
    let stamp = FileTime::from_unix_time(mtime, 0);
    set_file_times(&path, stamp, stamp).expect("stamp backup");
    path
}

pub fn test_config(root: &Path) -> RuntimeConfig {
    let mut schedules: Vec<ScheduleConfig> = default_schedules();
    for schedule in schedules.iter_mut() {
        if schedule.name == "hourly" {
            schedule.keep = 3;
        }
    }
    RuntimeConfig {
        target_dir: root.join("target"),
        instance: "default".to_string(),
        hostname: "host".to_string(),
        label_prefix: "zfs-auto-snap".to_string(),
        capacity_threshold: 90,
        state_dir: root.join("state"),
        verbose: false,
        rsync_path: PathBuf::from("/usr/bin/rsync"),
        rsync_extra: Vec::new(),
        log_files: true,
        schedules,
    }
}

#[derive(Default)]
struct FakeSnapshot {
    ctime: i64,
    properties: BTreeMap<String, String>,
    holds: Vec<String>,
}

#[derive(Default)]
struct StoreState {
    snapshots: BTreeMap<SnapshotName, FakeSnapshot>,
    mounted: HashMap<String, PathBuf>,
    hold_calls: HashMap<SnapshotName, usize>,
    vanish_on: Vec<(&'static str, SnapshotName)>,
}

/// A snapshot store whose clones share state, so a test can keep a handle
/// after boxing one into the queue.
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Rc<RefCell<StoreState>>,
}

impl FakeStore {
    pub fn add_snapshot(&self, snapshot: &str, ctime: i64, value: Option<&str>) {
        let mut entry = FakeSnapshot {
            ctime,
            ..FakeSnapshot::default()
        };
        if let Some(value) = value {
            entry
                .properties
                .insert("org.snapvault:rsync-default".to_string(), value.to_string());
        }
        self.state.borrow_mut().snapshots.insert(name(snapshot), entry);
    }

    pub fn add_hold(&self, snapshot: &str, tag: &str) {
        if let Some(entry) = self.state.borrow_mut().snapshots.get_mut(&name(snapshot)) {
            entry.holds.push(tag.to_string());
        }
    }

    pub fn holds_of(&self, snapshot: &str) -> Vec<String> {
        self.state
            .borrow()
            .snapshots
            .get(&name(snapshot))
            .map(|s| s.holds.clone())
            .unwrap_or_default()
    }

    /// Holds placed through the store interface.
    pub fn hold_count(&self, snapshot: &str) -> usize {
        self.state
            .borrow()
            .hold_calls
            .get(&name(snapshot))
            .copied()
            .unwrap_or(0)
    }

    pub fn property(&self, snapshot: &str, property: &str) -> Option<String> {
        self.state
            .borrow()
            .snapshots
            .get(&name(snapshot))
            .and_then(|s| s.properties.get(property).cloned())
    }

    pub fn mount(&self, filesystem: &str, mountpoint: &str) {
        self.state
            .borrow_mut()
            .mounted
            .insert(filesystem.to_string(), PathBuf::from(mountpoint));
    }

    pub fn destroy(&self, snapshot: &str) {
        self.state.borrow_mut().snapshots.remove(&name(snapshot));
    }

    /// Destroys `snapshot` the moment the store is asked `call` about it
    /// (or, for filesystem queries, about its filesystem).
    pub fn vanish_during(&self, snapshot: &str, call: &'static str) {
        self.state.borrow_mut().vanish_on.push((call, name(snapshot)));
    }

    fn trip(&self, call: &str, hit: impl Fn(&SnapshotName) -> bool) -> Option<StoreError> {
        let mut state = self.state.borrow_mut();
        let index = state
            .vanish_on
            .iter()
            .position(|(c, n)| *c == call && hit(n))?;
        let (_, gone) = state.vanish_on.remove(index);
        state.snapshots.remove(&gone);
        Some(Self::missing(&gone))
    }

    fn missing(snapshot: &SnapshotName) -> StoreError {
        StoreError::Command {
            command: format!("zfs {}", snapshot),
            code: 1,
            stderr: "dataset does not exist".to_string(),
        }
    }
}

impl SnapshotStore for FakeStore {
    fn list_tagged(&mut self, property: &str, value: &str) -> Result<Vec<PendingEntry>> {
        Ok(self
            .state
            .borrow()
            .snapshots
            .iter()
            .filter(|(_, s)| s.properties.get(property).map(String::as_str) == Some(value))
            .map(|(n, s)| PendingEntry::new(s.ctime, n.clone()))
            .collect())
    }

    fn exists(&mut self, snapshot: &SnapshotName) -> Result<bool> {
        Ok(self.state.borrow().snapshots.contains_key(snapshot))
    }

    fn creation_time(&mut self, snapshot: &SnapshotName) -> Result<i64> {
        let state = self.state.borrow();
        let entry = state.snapshots.get(snapshot).ok_or_else(|| Self::missing(snapshot))?;
        Ok(entry.ctime)
    }

    fn get_property(&mut self, snapshot: &SnapshotName, property: &str) -> Result<Option<String>> {
        let state = self.state.borrow();
        let entry = state.snapshots.get(snapshot).ok_or_else(|| Self::missing(snapshot))?;
        Ok(entry.properties.get(property).cloned())
    }

    fn set_property(&mut self, snapshot: &SnapshotName, property: &str, value: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entry = state
            .snapshots
            .get_mut(snapshot)
            .ok_or_else(|| Self::missing(snapshot))?;
        entry.properties.insert(property.to_string(), value.to_string());
        Ok(())
    }

    fn unset_property(&mut self, snapshot: &SnapshotName, property: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entry = state
            .snapshots
            .get_mut(snapshot)
            .ok_or_else(|| Self::missing(snapshot))?;
        entry.properties.remove(property);
        Ok(())
    }

    fn holds(&mut self, snapshot: &SnapshotName) -> Result<Vec<String>> {
        if let Some(err) = self.trip("holds", |n| n == snapshot) {
            return Err(err.into());
        }
        let state = self.state.borrow();
        let entry = state.snapshots.get(snapshot).ok_or_else(|| Self::missing(snapshot))?;
        Ok(entry.holds.clone())
    }

    fn hold(&mut self, snapshot: &SnapshotName, tag: &str) -> Result<()> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let entry = state
            .snapshots
            .get_mut(snapshot)
            .ok_or_else(|| Self::missing(snapshot))?;
        entry.holds.push(tag.to_string());
        *state.hold_calls.entry(snapshot.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn release(&mut self, snapshot: &SnapshotName, tag: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entry = state
            .snapshots
            .get_mut(snapshot)
            .ok_or_else(|| Self::missing(snapshot))?;
        let before = entry.holds.len();
        entry.holds.retain(|t| t != tag);
        if entry.holds.len() == before {
            return Err(StoreError::Command {
                command: format!("zfs release {} {}", tag, snapshot),
                code: 1,
                stderr: "no such tag on this dataset".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn held_snapshots(&mut self) -> Result<Vec<SnapshotName>> {
        Ok(self
            .state
            .borrow()
            .snapshots
            .iter()
            .filter(|(_, s)| !s.holds.is_empty())
            .map(|(n, _)| n.clone())
            .collect())
    }

    fn list_snapshots(&mut self, filesystem: &str) -> Result<Vec<SnapshotName>> {
        let state = self.state.borrow();
        let mut out: Vec<(i64, SnapshotName)> = state
            .snapshots
            .iter()
            .filter(|(n, _)| n.fs() == filesystem)
            .map(|(n, s)| (s.ctime, n.clone()))
            .collect();
        out.sort();
        Ok(out.into_iter().map(|(_, n)| n).collect())
    }

    fn is_mounted(&mut self, filesystem: &str) -> Result<bool> {
        if let Some(err) = self.trip("is_mounted", |n| n.fs() == filesystem) {
            return Err(err.into());
        }
        Ok(self.state.borrow().mounted.contains_key(filesystem))
    }

    fn mountpoint(&mut self, filesystem: &str) -> Result<Option<PathBuf>> {
        Ok(self.state.borrow().mounted.get(filesystem).cloned())
    }

    fn invalidate(&mut self) {}
}

#[derive(Default)]
struct ReplicatorState {
    codes: VecDeque<i32>,
    requests: Vec<TransferRequest>,
}

/// Writes a one-file tree into the destination and exits with scripted
/// codes; zero once the script runs out.
#[derive(Clone, Default)]
pub struct FakeReplicator {
    state: Rc<RefCell<ReplicatorState>>,
}

impl FakeReplicator {
    pub fn push_exit_code(&self, code: i32) {
        self.state.borrow_mut().codes.push_back(code);
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.state.borrow().requests.clone()
    }
}

impl Replicator for FakeReplicator {
    fn replicate(&self, request: &TransferRequest) -> Result<i32> {
        fs::create_dir_all(&request.dest)?;
        fs::write(request.dest.join("data"), request.source.display().to_string())?;
        if let Some(log) = &request.log_file {
            fs::write(log, "transferred\n")?;
        }
        let mut state = self.state.borrow_mut();
        state.requests.push(request.clone());
        Ok(state.codes.pop_front().unwrap_or(0))
    }
}

/// Reports `base + per_backup * n` percent used, where `n` counts the
/// completed backups of the layout's host.
#[derive(Clone)]
pub struct TreeProbe {
    layout: BackupLayout,
    base: u32,
    per_backup: u32,
    history: Rc<RefCell<Vec<u32>>>,
}

impl TreeProbe {
    pub fn new(layout: &BackupLayout, per_backup: u32) -> Self {
        Self::with_base(layout, 0, per_backup)
    }

    pub fn with_base(layout: &BackupLayout, base: u32, per_backup: u32) -> Self {
        Self {
            layout: layout.clone(),
            base,
            per_backup,
            history: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn history(&self) -> Vec<u32> {
        self.history.borrow().clone()
    }
}

impl CapacityProbe for TreeProbe {
    fn used_percent(&self, _path: &Path) -> Result<u32> {
        let mut count = 0;
        for fs_dir in self.layout.filesystem_dirs()? {
            count += list_backups(&fs_dir.path)?.len() as u32;
        }
        let used = (self.base + self.per_backup * count).min(100);
        self.history.borrow_mut().push(used);
        Ok(used)
    }
}

#[derive(Clone, Default)]
pub struct RecordingBus {
    events: Rc<RefCell<Vec<String>>>,
}

impl RecordingBus {
    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    fn push(&self, event: String) {
        self.events.borrow_mut().push(event);
    }
}

impl StatusBus for RecordingBus {
    fn backup_started(&self, target: &Path) {
        self.push(format!("started {}", target.display()));
    }

    fn backup_progress(&self, snapshot: &SnapshotName, remaining: usize) {
        self.push(format!("progress {} {}", snapshot, remaining));
    }

    fn backup_complete(&self, target: &Path) {
        self.push(format!("complete {}", target.display()));
    }

    fn in_sync(&self) {
        self.push("in-sync".to_string());
    }

    fn out_of_sync(&self, pending: usize) {
        self.push(format!("out-of-sync {}", pending));
    }
}
