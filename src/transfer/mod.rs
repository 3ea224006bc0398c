use std::fs;
use std::path::Path;

use filetime::{set_file_times, FileTime};

use crate::error::{Result, SnapvaultError};
use crate::layout::ensure_in_backup_tree;

pub mod rsync;

pub use rsync::{Replicator, RsyncReplicator, TransferRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    /// The device went away or the copy was interrupted; try again later.
    Recoverable(i32),
    /// The tool failed in a way we do not understand.
    Fatal(i32),
}

pub fn classify(code: i32) -> TransferOutcome {
    match code {
        0 => TransferOutcome::Success,
        11 | 12 | 20 => TransferOutcome::Recoverable(code),
        _ => TransferOutcome::Fatal(code),
    }
}

pub fn describe_exit(code: i32) -> &'static str {
    match code {
        0 => "success",
        11 => "error in file I/O",
        12 => "error in protocol data stream",
        20 => "interrupted by signal",
        _ => "unexpected failure",
    }
}

/// Runs one transfer to completion and classifies the result.
pub fn run(replicator: &dyn Replicator, request: &TransferRequest) -> Result<TransferOutcome> {
    let reference = match &request.reference {
        Some(path) => path.display().to_string(),
        None => "<none>".to_string(),
    };
    tracing::info!(
        source = %request.source.display(),
        dest = %request.dest.display(),
        reference = %reference,
        "transfer started"
    );
    let code = replicator.replicate(request)?;
    let outcome = classify(code);
    match outcome {
        TransferOutcome::Success => tracing::info!(dest = %request.dest.display(), "transfer complete"),
        TransferOutcome::Recoverable(code) | TransferOutcome::Fatal(code) => tracing::warn!(
            dest = %request.dest.display(),
            code,
            reason = describe_exit(code),
            "transfer failed"
        ),
    }
    Ok(outcome)
}

/// Moves a finished transfer into place and stamps it with the snapshot's
/// creation time, which the linker relies on to order backups.
pub fn finalize(partial: &Path, dest: &Path, ctime: i64) -> Result<()> {
    ensure_in_backup_tree(partial)?;
    ensure_in_backup_tree(dest)?;
    if dest.exists() {
        return Err(SnapvaultError::message(format!(
            "backup {} already exists",
            dest.display()
        )));
    }
    fs::rename(partial, dest).map_err(|e| {
        SnapvaultError::message(format!(
            "rename {} to {}: {}",
            partial.display(),
            dest.display(),
            e
        ))
    })?;
    stamp(dest, ctime)
}

/// Sets the mtime of a backup directory to its snapshot's creation time.
pub fn stamp(dest: &Path, ctime: i64) -> Result<()> {
    let time = FileTime::from_unix_time(ctime, 0);
    set_file_times(dest, time, time)
        .map_err(|e| SnapvaultError::message(format!("utime {}: {}", dest.display(), e)))
}
