//! On-disk layout of the backup device.
//!
//! ```text
//! <targetDir>/.snapvault/rsync/<host>/<fs>/<label>          completed backup
//! <targetDir>/.snapvault/rsync/<host>/<fs>/.partial/<label> in progress
//! <targetDir>/.snapvault/rsync/<host>/<fs>/.trash/<label>   awaiting purge
//! <targetDir>/.snapvault/rsync/<host>/<fs>/.lock/<label>.lock
//! <targetDir>/.snapvault/rsync/<host>/<fs>/.logs/<label>.log
//! ```
//!
//! Filesystem names contain `/`, so a filesystem directory may hold both
//! backups and the directories of child filesystems. Every filesystem
//! directory carries a marker file to tell the two apart.

use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, SnapvaultError};
use crate::util::paths::list_entries_if_exists;

pub const TREE_DIR: &str = ".snapvault";
pub const TREE_SUBDIR: &str = "rsync";
pub const FS_MARKER: &str = ".snapvault-fs";
pub const PARTIAL_DIR: &str = ".partial";
pub const TRASH_DIR: &str = ".trash";
pub const LOCK_DIR: &str = ".lock";
pub const LOG_DIR: &str = ".logs";

#[derive(Debug, Clone)]
pub struct BackupLayout {
    root: PathBuf,
    host: String,
}

/// A directory holding the backups of one filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsDir {
    pub fs: String,
    pub path: PathBuf,
}

/// A completed backup directory; `mtime` equals its snapshot's creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub label: String,
    pub path: PathBuf,
    pub mtime: i64,
}

impl BackupLayout {
    pub fn new(target_dir: &Path, host: &str) -> Self {
        Self {
            root: target_dir.join(TREE_DIR).join(TREE_SUBDIR),
            host: host.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn host_dir(&self) -> PathBuf {
        self.root.join(&self.host)
    }

    pub fn fs_dir(&self, fs: &str) -> PathBuf {
        self.host_dir().join(fs)
    }

    pub fn fs_name(&self, fs_dir: &Path) -> Option<String> {
        let host_dir = self.host_dir();
        let rel = fs_dir.strip_prefix(&host_dir).ok()?;
        let name = rel.to_string_lossy().to_string();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Creates the filesystem directory, its control directories and marker.
    pub fn prepare_fs_dir(&self, fs: &str) -> Result<PathBuf> {
        let dir = self.fs_dir(fs);
        for sub in [PARTIAL_DIR, TRASH_DIR, LOCK_DIR, LOG_DIR] {
            let path = dir.join(sub);
            fs::create_dir_all(&path)
                .map_err(|e| SnapvaultError::message(format!("create {}: {}", path.display(), e)))?;
        }
        let marker = dir.join(FS_MARKER);
        if !marker.exists() {
            fs::write(&marker, format!("{}\n", fs))
                .map_err(|e| SnapvaultError::message(format!("write {}: {}", marker.display(), e)))?;
        }
        Ok(dir)
    }

    /// Every filesystem directory below the host directory.
    pub fn filesystem_dirs(&self) -> Result<Vec<FsDir>> {
        let host_dir = self.host_dir();
        if !host_dir.is_dir() {
            return Ok(Vec::new());
        }
        let walker = WalkDir::new(&host_dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() || is_control_name(&entry.file_name().to_string_lossy()) {
                    return false;
                }
                // Backups live directly inside a marked directory; never descend into them.
                let parent_is_fs = entry
                    .path()
                    .parent()
                    .map(|p| p.join(FS_MARKER).is_file())
                    .unwrap_or(false);
                !parent_is_fs || entry.path().join(FS_MARKER).is_file()
            });
        let mut out = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                SnapvaultError::message(format!("walk {}: {}", host_dir.display(), e))
            })?;
            if !entry.path().join(FS_MARKER).is_file() {
                continue;
            }
            if let Some(fs) = self.fs_name(entry.path()) {
                out.push(FsDir {
                    fs,
                    path: entry.path().to_path_buf(),
                });
            }
        }
        Ok(out)
    }
}

pub fn is_control_name(name: &str) -> bool {
    name.starts_with('.')
}

pub fn backup_path(fs_dir: &Path, label: &str) -> PathBuf {
    fs_dir.join(label)
}

pub fn partial_path(fs_dir: &Path, label: &str) -> PathBuf {
    fs_dir.join(PARTIAL_DIR).join(label)
}

pub fn trash_path(fs_dir: &Path, label: &str) -> PathBuf {
    fs_dir.join(TRASH_DIR).join(label)
}

pub fn lock_path(fs_dir: &Path, label: &str) -> PathBuf {
    fs_dir.join(LOCK_DIR).join(format!("{}.lock", label))
}

pub fn log_path(fs_dir: &Path, label: &str) -> PathBuf {
    fs_dir.join(LOG_DIR).join(format!("{}.log", label))
}

pub fn trash_log_path(fs_dir: &Path, label: &str) -> PathBuf {
    fs_dir.join(TRASH_DIR).join(format!("{}.log", label))
}

/// Completed backups of one filesystem directory, in directory order.
pub fn list_backups(fs_dir: &Path) -> Result<Vec<BackupRecord>> {
    let mut out = Vec::new();
    for name in list_entries_if_exists(fs_dir)? {
        if is_control_name(&name) {
            continue;
        }
        let path = fs_dir.join(&name);
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(SnapvaultError::message(format!(
                    "stat {}: {}",
                    path.display(),
                    err
                )))
            }
        };
        if !meta.is_dir() || path.join(FS_MARKER).is_file() {
            continue;
        }
        out.push(BackupRecord {
            label: name,
            path,
            mtime: meta.mtime(),
        });
    }
    Ok(out)
}

/// Labels of the in-progress transfers of one filesystem directory.
pub fn list_partials(fs_dir: &Path) -> Result<Vec<String>> {
    let dir = fs_dir.join(PARTIAL_DIR);
    let mut out = Vec::new();
    for name in list_entries_if_exists(&dir)? {
        if dir.join(&name).is_dir() {
            out.push(name);
        }
    }
    out.sort();
    Ok(out)
}

/// Rejects any path that is not strictly below `.snapvault/rsync`.
pub fn ensure_in_backup_tree(path: &Path) -> Result<()> {
    let parts: Vec<&OsStr> = path.components().map(|c| c.as_os_str()).collect();
    let inside = parts.windows(2).enumerate().any(|(i, w)| {
        w[0] == OsStr::new(TREE_DIR) && w[1] == OsStr::new(TREE_SUBDIR) && i + 2 < parts.len()
    });
    let escapes = path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir));
    if !inside || escapes {
        return Err(SnapvaultError::OutsideBackupTree(path.to_path_buf()));
    }
    Ok(())
}

pub fn remove_tree(path: &Path) -> Result<()> {
    ensure_in_backup_tree(path)?;
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)
            .map_err(|e| SnapvaultError::message(format!("remove {}: {}", path.display(), e))),
        Ok(_) => fs::remove_file(path)
            .map_err(|e| SnapvaultError::message(format!("remove {}: {}", path.display(), e))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SnapvaultError::message(format!(
            "stat {}: {}",
            path.display(),
            err
        ))),
    }
}

pub fn move_tree(from: &Path, to: &Path) -> Result<()> {
    ensure_in_backup_tree(from)?;
    ensure_in_backup_tree(to)?;
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| SnapvaultError::message(format!("create {}: {}", parent.display(), e)))?;
    }
    if to.exists() {
        remove_tree(to)?;
    }
    fs::rename(from, to).map_err(|e| {
        SnapvaultError::message(format!(
            "rename {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })
}
