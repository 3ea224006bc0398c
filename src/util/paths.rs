use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::{Result, SnapvaultError};

pub fn is_safe_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

pub fn ensure_private_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let meta = fs::metadata(path)
            .map_err(|e| SnapvaultError::message(format!("stat {}: {}", path.display(), e)))?;
        if !meta.is_dir() {
            return Err(SnapvaultError::message(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        return Ok(());
    }
    fs::create_dir_all(path)
        .map_err(|e| SnapvaultError::message(format!("create {}: {}", path.display(), e)))?;
    let mut perms = fs::metadata(path)
        .map_err(|e| SnapvaultError::message(format!("stat {}: {}", path.display(), e)))?
        .permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms)
        .map_err(|e| SnapvaultError::message(format!("chmod {}: {}", path.display(), e)))?;
    Ok(())
}

pub fn list_entries(path: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(path)
        .map_err(|e| SnapvaultError::message(format!("read {}: {}", path.display(), e)))?
    {
        let entry = entry
            .map_err(|e| SnapvaultError::message(format!("read {}: {}", path.display(), e)))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "." || name == ".." {
            continue;
        }
        out.push(name);
    }
    Ok(out)
}

/// Like `list_entries`, but a missing directory is empty.
pub fn list_entries_if_exists(path: &Path) -> Result<Vec<String>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => list_entries(path),
        Ok(_) => Ok(Vec::new()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(SnapvaultError::message(format!(
            "stat {}: {}",
            path.display(),
            err
        ))),
    }
}

pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SnapvaultError::message(format!(
            "remove {}: {}",
            path.display(),
            err
        ))),
    }
}
