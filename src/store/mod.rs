//! The snapshot store the queue replicates from.

use std::path::PathBuf;

use crate::error::Result;
use crate::types::{PendingEntry, SnapshotName};

pub mod zfs;

pub use zfs::ZfsStore;

pub const PENDING: &str = "pending";
pub const COMPLETED: &str = "completed";

pub trait SnapshotStore {
    /// Snapshots whose `property` is set locally to `value`, with creation
    /// times, in no particular order.
    fn list_tagged(&mut self, property: &str, value: &str) -> Result<Vec<PendingEntry>>;
    fn exists(&mut self, snapshot: &SnapshotName) -> Result<bool>;
    fn creation_time(&mut self, snapshot: &SnapshotName) -> Result<i64>;
    fn get_property(&mut self, snapshot: &SnapshotName, property: &str) -> Result<Option<String>>;
    fn set_property(&mut self, snapshot: &SnapshotName, property: &str, value: &str) -> Result<()>;
    fn unset_property(&mut self, snapshot: &SnapshotName, property: &str) -> Result<()>;
    fn holds(&mut self, snapshot: &SnapshotName) -> Result<Vec<String>>;
    fn hold(&mut self, snapshot: &SnapshotName, tag: &str) -> Result<()>;
    fn release(&mut self, snapshot: &SnapshotName, tag: &str) -> Result<()>;
    /// Snapshots with at least one user hold.
    fn held_snapshots(&mut self) -> Result<Vec<SnapshotName>>;
    fn list_snapshots(&mut self, filesystem: &str) -> Result<Vec<SnapshotName>>;
    fn is_mounted(&mut self, filesystem: &str) -> Result<bool>;
    fn mountpoint(&mut self, filesystem: &str) -> Result<Option<PathBuf>>;
    /// Drops any cached listing so the next query sees fresh state.
    fn invalidate(&mut self);
}
