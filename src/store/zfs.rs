use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Result, SnapvaultError, StoreError};
use crate::store::SnapshotStore;
use crate::types::{PendingEntry, SnapshotName};
use crate::util::command::{capture_output, describe_command, exit_code};

const ZFS: &str = "/sbin/zfs";
const MOUNTS: &str = "/proc/self/mounts";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SnapshotInfo {
    name: SnapshotName,
    creation: i64,
    userrefs: u64,
}

/// `SnapshotStore` backed by the `zfs(8)` command.
///
/// The full snapshot listing is cached for the lifetime of the value until
/// `invalidate` is called; point queries (existence, holds, properties) always
/// go to zfs.
pub struct ZfsStore {
    zfs: PathBuf,
    snapshots: Option<Vec<SnapshotInfo>>,
}

impl Default for ZfsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ZfsStore {
    pub fn new() -> Self {
        Self::with_command(Path::new(ZFS))
    }

    pub fn with_command(zfs: &Path) -> Self {
        Self {
            zfs: zfs.to_path_buf(),
            snapshots: None,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.zfs);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn snapshots(&mut self) -> Result<&[SnapshotInfo]> {
        if self.snapshots.is_none() {
            let mut cmd = self.command();
            cmd.args(["list", "-H", "-p", "-t", "snapshot", "-o", "name,creation,userrefs"]);
            let output = capture_output(&mut cmd)?;
            self.snapshots = Some(parse_snapshot_list(&output)?);
        }
        Ok(self.snapshots.as_deref().unwrap_or(&[]))
    }

    fn get_value(&self, property: &str, dataset: &str) -> Result<String> {
        let mut cmd = self.command();
        cmd.args(["get", "-H", "-p", "-o", "value", property, dataset]);
        Ok(capture_output(&mut cmd)?.trim().to_string())
    }
}

impl SnapshotStore for ZfsStore {
    fn list_tagged(&mut self, property: &str, value: &str) -> Result<Vec<PendingEntry>> {
        let mut cmd = self.command();
        cmd.args(["get", "-H", "-t", "snapshot", "-s", "local", "-o", "name,value", property]);
        let output = capture_output(&mut cmd)?;
        let names = parse_tagged(&output, value);
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = self.command();
        cmd.args(["get", "-p", "-H", "-o", "value,name", "creation"]);
        cmd.args(names.iter().map(|n| n.to_string()));
        let output = capture_output(&mut cmd)?;
        parse_creation(&output)
    }

    fn exists(&mut self, snapshot: &SnapshotName) -> Result<bool> {
        let mut cmd = self.command();
        cmd.args(["list", "-H", "-o", "name", "-t", "snapshot"])
            .arg(snapshot.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let status = cmd
            .status()
            .map_err(|e| SnapvaultError::message(format!("{}: {}", describe_command(&cmd), e)))?;
        Ok(exit_code(status) == 0)
    }

    fn creation_time(&mut self, snapshot: &SnapshotName) -> Result<i64> {
        let value = self.get_value("creation", &snapshot.to_string())?;
        value
            .parse::<i64>()
            .map_err(|_| StoreError::Parse(format!("creation of {}: {}", snapshot, value)).into())
    }

    fn get_property(&mut self, snapshot: &SnapshotName, property: &str) -> Result<Option<String>> {
        let mut cmd = self.command();
        cmd.args(["get", "-H", "-s", "local", "-o", "value", property])
            .arg(snapshot.to_string());
        let value = capture_output(&mut cmd)?.trim().to_string();
        if value.is_empty() || value == "-" {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    fn set_property(&mut self, snapshot: &SnapshotName, property: &str, value: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("set")
            .arg(format!("{}={}", property, value))
            .arg(snapshot.to_string());
        capture_output(&mut cmd)?;
        Ok(())
    }

    fn unset_property(&mut self, snapshot: &SnapshotName, property: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("inherit").arg(property).arg(snapshot.to_string());
        capture_output(&mut cmd)?;
        Ok(())
    }

    fn holds(&mut self, snapshot: &SnapshotName) -> Result<Vec<String>> {
        let mut cmd = self.command();
        cmd.args(["holds", "-H"]).arg(snapshot.to_string());
        Ok(parse_holds(&capture_output(&mut cmd)?))
    }

    fn hold(&mut self, snapshot: &SnapshotName, tag: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("hold").arg(tag).arg(snapshot.to_string());
        capture_output(&mut cmd)?;
        Ok(())
    }

    fn release(&mut self, snapshot: &SnapshotName, tag: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("release").arg(tag).arg(snapshot.to_string());
        capture_output(&mut cmd)?;
        Ok(())
    }

    fn held_snapshots(&mut self) -> Result<Vec<SnapshotName>> {
        Ok(self
            .snapshots()?
            .iter()
            .filter(|s| s.userrefs > 0)
            .map(|s| s.name.clone())
            .collect())
    }

    fn list_snapshots(&mut self, filesystem: &str) -> Result<Vec<SnapshotName>> {
        Ok(snapshots_of(self.snapshots()?, filesystem))
    }

    fn is_mounted(&mut self, filesystem: &str) -> Result<bool> {
        Ok(self.get_value("mounted", filesystem)? == "yes")
    }

    fn mountpoint(&mut self, filesystem: &str) -> Result<Option<PathBuf>> {
        let value = self.get_value("mountpoint", filesystem)?;
        match value.as_str() {
            "none" | "-" | "" => Ok(None),
            "legacy" => {
                let contents = fs::read_to_string(MOUNTS)
                    .map_err(|e| SnapvaultError::message(format!("read {}: {}", MOUNTS, e)))?;
                Ok(find_mountpoint(&contents, filesystem))
            }
            path => Ok(Some(PathBuf::from(path))),
        }
    }

    fn invalidate(&mut self) {
        self.snapshots = None;
    }
}

fn parse_tagged(output: &str, value: &str) -> Vec<SnapshotName> {
    let mut names = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 || fields[1] != value {
            continue;
        }
        match fields[0].parse::<SnapshotName>() {
            Ok(name) => names.push(name),
            Err(_) => {
                tracing::warn!(dataset = fields[0], "property set on a non-snapshot dataset; ignoring");
            }
        }
    }
    names
}

fn parse_creation(output: &str) -> Result<Vec<PendingEntry>> {
    let mut out = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 {
            return Err(StoreError::Parse(line.to_string()).into());
        }
        let ctime = fields[0]
            .parse::<i64>()
            .map_err(|_| StoreError::Parse(line.to_string()))?;
        let name = fields[1]
            .parse::<SnapshotName>()
            .map_err(|_| StoreError::InvalidName(fields[1].to_string()))?;
        out.push(PendingEntry::new(ctime, name));
    }
    Ok(out)
}

fn parse_snapshot_list(output: &str) -> Result<Vec<SnapshotInfo>> {
    let mut out = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(StoreError::Parse(line.to_string()).into());
        }
        let name = fields[0]
            .parse::<SnapshotName>()
            .map_err(|_| StoreError::InvalidName(fields[0].to_string()))?;
        let creation = fields[1]
            .parse::<i64>()
            .map_err(|_| StoreError::Parse(line.to_string()))?;
        let userrefs = fields[2].parse::<u64>().unwrap_or(0);
        out.push(SnapshotInfo {
            name,
            creation,
            userrefs,
        });
    }
    Ok(out)
}

/// Snapshots of one filesystem, oldest first.
fn snapshots_of(list: &[SnapshotInfo], filesystem: &str) -> Vec<SnapshotName> {
    let mut found: Vec<&SnapshotInfo> = list.iter().filter(|s| s.name.fs() == filesystem).collect();
    found.sort_by_key(|s| s.creation);
    found.into_iter().map(|s| s.name.clone()).collect()
}

fn parse_holds(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn find_mountpoint(mounts: &str, source: &str) -> Option<PathBuf> {
    for line in mounts.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        if fields[0] == source && fields[2] == "zfs" {
            return Some(PathBuf::from(fields[1]));
        }
    }
    None
}
