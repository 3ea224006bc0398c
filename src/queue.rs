//! The replication queue.
//!
//! Each call to [`QueueManager::step`] replicates at most one pending
//! snapshot and returns. Snapshots are taken newest first, in working sets
//! that share one snapshot label, so the most recent state of every
//! filesystem reaches the device before older catch-up copies.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::model::RuntimeConfig;
use crate::error::{Result, SnapvaultError};
use crate::layout::{backup_path, lock_path, log_path, partial_path, BackupLayout};
use crate::linker::IncrementalLinker;
use crate::lock::ReferenceLock;
use crate::maintenance::Maintenance;
use crate::retention::RetentionManager;
use crate::space::{CapacityProbe, SpaceManager};
use crate::status::StatusBus;
use crate::store::{SnapshotStore, COMPLETED, PENDING};
use crate::transfer::{self, describe_exit, Replicator, TransferOutcome, TransferRequest};
use crate::types::{newest_first, PendingEntry, SnapshotName};

/// The collaborators a queue drives.
pub struct Services {
    pub store: Box<dyn SnapshotStore>,
    pub replicator: Box<dyn Replicator>,
    pub probe: Box<dyn CapacityProbe>,
    pub bus: Box<dyn StatusBus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// Transient: the next scheduled run starts over cleanly.
    Retry(String),
    /// Fatal: maintenance state has been entered.
    Maintenance(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    QueueEmpty,
    Halt(Halt),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Destroyed after it was queued.
    Vanished,
    /// Its filesystem is not mounted, so there is nothing to read.
    Unmounted,
}

pub struct QueueManager {
    store: Box<dyn SnapshotStore>,
    replicator: Box<dyn Replicator>,
    bus: Box<dyn StatusBus>,
    space: SpaceManager,
    retention: RetentionManager,
    linker: IncrementalLinker,
    maintenance: Maintenance,
    layout: BackupLayout,
    target_dir: PathBuf,
    property: String,
    log_files: bool,
    pending: Vec<PendingEntry>,
    working_set: VecDeque<PendingEntry>,
    skipped: BTreeMap<SnapshotName, SkipReason>,
    started: bool,
}

impl QueueManager {
    pub fn new(config: &RuntimeConfig, services: Services) -> Self {
        Self {
            store: services.store,
            replicator: services.replicator,
            bus: services.bus,
            space: SpaceManager::new(services.probe, config.capacity_threshold),
            retention: RetentionManager::new(&config.label_prefix, &config.schedules),
            linker: IncrementalLinker::new(),
            maintenance: Maintenance::new(&config.state_dir),
            layout: BackupLayout::new(&config.target_dir, &config.hostname),
            target_dir: config.target_dir.clone(),
            property: config.property_name(),
            log_files: config.log_files,
            pending: Vec::new(),
            working_set: VecDeque::new(),
            skipped: BTreeMap::new(),
            started: false,
        }
    }

    pub fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    pub fn pending(&self) -> &[PendingEntry] {
        &self.pending
    }

    pub fn skipped(&self) -> &BTreeMap<SnapshotName, SkipReason> {
        &self.skipped
    }

    pub fn store_mut(&mut self) -> &mut dyn SnapshotStore {
        self.store.as_mut()
    }

    /// Reloads the pending list from the store, newest first.
    pub fn refresh(&mut self) -> Result<()> {
        self.store.invalidate();
        let mut entries = self.store.list_tagged(&self.property, PENDING)?;
        entries.sort_by(newest_first);
        self.pending = entries;
        Ok(())
    }

    /// Fills an empty working set with every pending, unskipped entry sharing
    /// the head entry's label. Returns false if nothing is left to do.
    pub fn next_working_set(&mut self) -> bool {
        if !self.working_set.is_empty() {
            return true;
        }
        let Some(head) = self
            .pending
            .iter()
            .find(|e| !self.skipped.contains_key(&e.name))
        else {
            return false;
        };
        let label = head.name.label().to_string();
        self.working_set = self
            .pending
            .iter()
            .filter(|e| e.name.label() == label && !self.skipped.contains_key(&e.name))
            .cloned()
            .collect();
        tracing::debug!(label = %label, size = self.working_set.len(), "new working set");
        true
    }

    /// Pending entries that have not been skipped.
    pub fn outstanding(&self) -> usize {
        self.pending
            .iter()
            .filter(|e| !self.skipped.contains_key(&e.name))
            .count()
    }

    pub fn step(&mut self) -> Result<StepOutcome> {
        let mut fresh_cycle = false;
        if self.working_set.is_empty() {
            self.refresh()?;
            if !self.next_working_set() {
                return Ok(self.finish());
            }
            fresh_cycle = true;
        }

        if !self.device_available() {
            self.bus.out_of_sync(self.outstanding());
            return Ok(StepOutcome::Halt(Halt::Retry(format!(
                "backup target {} is not accessible",
                self.target_dir.display()
            ))));
        }
        if fresh_cycle {
            self.retention.purge_trash(&self.layout)?;
            self.linker.invalidate_all();
        }
        if !self.started {
            self.started = true;
            self.bus.backup_started(self.layout.root());
        }
        if let Some(halt) = self.ensure_space()? {
            return Ok(StepOutcome::Halt(halt));
        }

        let Some(entry) = self.working_set.pop_front() else {
            return Ok(StepOutcome::Continue);
        };
        self.process(entry)
    }

    /// Steps until the queue is empty, a step halts, or `stop` is raised.
    /// Unexpected errors end the run; an attempt to touch data outside the
    /// backup tree also enters maintenance.
    pub fn drain(&mut self, stop: &AtomicBool) -> StepOutcome {
        loop {
            if stop.load(Ordering::SeqCst) {
                return StepOutcome::Halt(Halt::Retry("interrupted".to_string()));
            }
            match self.step() {
                Ok(StepOutcome::Continue) => continue,
                Ok(outcome) => return outcome,
                Err(err @ SnapvaultError::OutsideBackupTree(_)) => {
                    let reason = err.to_string();
                    if let Err(e) = self.maintenance.enter(&reason) {
                        tracing::error!(error = %e, "cannot record maintenance state");
                    }
                    return StepOutcome::Halt(Halt::Maintenance(reason));
                }
                Err(err) => {
                    tracing::error!(error = %err, "backup step failed");
                    return StepOutcome::Halt(Halt::Retry(err.to_string()));
                }
            }
        }
    }

    fn finish(&mut self) -> StepOutcome {
        if self.started {
            self.bus.backup_complete(self.layout.root());
            self.started = false;
        }
        self.bus.in_sync();
        StepOutcome::QueueEmpty
    }

    fn device_available(&self) -> bool {
        if !self.target_dir.is_dir() {
            tracing::warn!(target_dir = %self.target_dir.display(), "backup target not accessible");
            return false;
        }
        if let Err(err) = fs::create_dir_all(self.layout.root()) {
            tracing::warn!(root = %self.layout.root().display(), error = %err, "cannot create backup root");
            return false;
        }
        true
    }

    fn ensure_space(&mut self) -> Result<Option<Halt>> {
        let root = self.layout.root().to_path_buf();
        if !self.space.over_threshold(&root)? {
            return Ok(None);
        }
        let report = self.space.recover_space(&self.layout)?;
        if !report.evicted.is_empty() {
            self.linker.invalidate_all();
        }
        if report.capacity > self.space.threshold() {
            self.bus.out_of_sync(self.outstanding());
            return Ok(Some(Halt::Retry(format!(
                "backup device is {}% full",
                report.capacity
            ))));
        }
        Ok(None)
    }

    fn forget(&mut self, name: &SnapshotName) {
        self.pending.retain(|e| &e.name != name);
    }

    fn skip(&mut self, name: &SnapshotName, reason: SkipReason) {
        tracing::info!(snapshot = %name, reason = ?reason, "skipping snapshot");
        self.skipped.insert(name.clone(), reason);
        self.forget(name);
    }

    fn process(&mut self, entry: PendingEntry) -> Result<StepOutcome> {
        let name = entry.name.clone();
        if !self.store.exists(&name)? {
            self.skip(&name, SkipReason::Vanished);
            return Ok(StepOutcome::Continue);
        }

        let held = match self.store.holds(&name) {
            Ok(holds) => holds.iter().any(|tag| tag == &self.property),
            Err(err) => return self.vanished_or(&name, err),
        };
        if !held {
            if let Err(err) = self.store.hold(&name, &self.property) {
                return self.vanished_or(&name, err);
            }
        }

        let result = match self.replicate(&entry) {
            Err(err @ SnapvaultError::Store(_)) => self.vanished_or(&name, err),
            other => other,
        };
        if let Err(err) = self.store.release(&name, &self.property) {
            tracing::warn!(snapshot = %name, error = %err, "cannot release hold");
        }
        result
    }

    /// A store call failed for `name`. If the snapshot was destroyed in the
    /// meantime that is an ordinary skip; otherwise `err` stands.
    fn vanished_or(&mut self, name: &SnapshotName, err: SnapvaultError) -> Result<StepOutcome> {
        if self.store.exists(name)? {
            return Err(err);
        }
        self.skip(name, SkipReason::Vanished);
        Ok(StepOutcome::Continue)
    }

    fn replicate(&mut self, entry: &PendingEntry) -> Result<StepOutcome> {
        let name = &entry.name;
        let fs = name.fs();
        let label = name.label();
        let mountpoint = if self.store.is_mounted(fs)? {
            self.store.mountpoint(fs)?
        } else {
            None
        };
        let Some(mountpoint) = mountpoint else {
            self.skip(name, SkipReason::Unmounted);
            return Ok(StepOutcome::Continue);
        };
        let source = snapshot_source(&mountpoint, label);

        let fs_dir = self.layout.prepare_fs_dir(fs)?;
        let dest = backup_path(&fs_dir, label);
        if dest.is_dir() {
            // Moved into place by an earlier run that stopped before
            // recording completion.
            transfer::stamp(&dest, entry.ctime)?;
            self.linker.invalidate(&fs_dir);
            self.store.set_property(name, &self.property, COMPLETED)?;
            self.forget(name);
            tracing::info!(snapshot = %name, backup = %dest.display(), "backup already in place");
            return Ok(StepOutcome::Continue);
        }
        let reference = self.linker.find_reference(&fs_dir, entry.ctime)?;
        let guard = match &reference {
            Some(path) => {
                let reference_label = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                match ReferenceLock::try_acquire(&lock_path(&fs_dir, &reference_label))? {
                    Some(lock) => Some(lock),
                    None => {
                        return Ok(StepOutcome::Halt(Halt::Retry(format!(
                            "reference {} is in use by another process",
                            path.display()
                        ))))
                    }
                }
            }
            None => None,
        };

        let request = TransferRequest {
            source,
            dest: partial_path(&fs_dir, label),
            reference,
            log_file: self.log_files.then(|| log_path(&fs_dir, label)),
        };
        let remaining = self.outstanding().saturating_sub(1);
        self.bus.backup_progress(name, remaining);
        let outcome = transfer::run(self.replicator.as_ref(), &request);
        drop(guard);

        match outcome? {
            TransferOutcome::Success => {
                transfer::finalize(&request.dest, &dest, entry.ctime)?;
                self.linker.invalidate(&fs_dir);
                self.store.set_property(name, &self.property, COMPLETED)?;
                self.forget(name);
                tracing::info!(snapshot = %name, remaining, "snapshot backed up");
                if !self.retention.apply(&fs_dir, label)?.is_empty() {
                    self.linker.invalidate(&fs_dir);
                }
                if let Some(halt) = self.ensure_space()? {
                    return Ok(StepOutcome::Halt(halt));
                }
                Ok(StepOutcome::Continue)
            }
            TransferOutcome::Recoverable(code) => Ok(StepOutcome::Halt(Halt::Retry(format!(
                "backup of {} stopped: {} (exit code {})",
                name,
                describe_exit(code),
                code
            )))),
            TransferOutcome::Fatal(code) => {
                let reason = format!(
                    "backup of {} failed: {} (exit code {})",
                    name,
                    describe_exit(code),
                    code
                );
                self.maintenance.enter(&reason)?;
                Ok(StepOutcome::Halt(Halt::Maintenance(reason)))
            }
        }
    }
}

fn snapshot_source(mountpoint: &Path, label: &str) -> PathBuf {
    mountpoint.join(".zfs").join("snapshot").join(label)
}
