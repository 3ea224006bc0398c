use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const SNAPSHOT_SEPARATOR: char = '@';

/// A snapshot identity, `filesystem@label`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotName {
    fs: String,
    label: String,
}

impl SnapshotName {
    pub fn new(fs: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            fs: fs.into(),
            label: label.into(),
        }
    }

    pub fn fs(&self) -> &str {
        &self.fs
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl FromStr for SnapshotName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (fs, label) = s
            .rsplit_once(SNAPSHOT_SEPARATOR)
            .ok_or_else(|| format!("{} is not a snapshot name", s))?;
        if fs.is_empty() || label.is_empty() {
            return Err(format!("{} is not a snapshot name", s));
        }
        if label.contains('/') {
            return Err(format!("snapshot label {} must not contain '/'", label));
        }
        Ok(SnapshotName::new(fs, label))
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.fs, SNAPSHOT_SEPARATOR, self.label)
    }
}

/// A snapshot waiting to be replicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub ctime: i64,
    pub name: SnapshotName,
}

impl PendingEntry {
    pub fn new(ctime: i64, name: SnapshotName) -> Self {
        Self { ctime, name }
    }
}

/// Newest first; equal creation times fall back to the name so the order is
/// total.
pub fn newest_first(a: &PendingEntry, b: &PendingEntry) -> Ordering {
    b.ctime.cmp(&a.ctime).then_with(|| b.name.cmp(&a.name))
}

/// Extracts the schedule from a label of the form
/// `<prefix>_<schedule>-<timestamp>`.
pub fn schedule_of<'a>(label: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = label.strip_prefix(prefix)?.strip_prefix('_')?;
    let (schedule, stamp) = rest.split_once('-')?;
    if schedule.is_empty() || stamp.is_empty() {
        return None;
    }
    Some(schedule)
}
