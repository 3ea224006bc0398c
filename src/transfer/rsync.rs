use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::sys::stat::Mode;

use crate::error::Result;
use crate::util::command::{run_command, set_child_umask};

/// Mask for the rsync child: new backups are read-only to their owner unless
/// rsync copies the source permissions over them.
const BACKUP_UMASK: u32 = 0o222;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub reference: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

/// Copies `source` into `dest`, returning the tool's exit code. Blocks until
/// the copy has finished.
pub trait Replicator {
    fn replicate(&self, request: &TransferRequest) -> Result<i32>;
}

pub struct RsyncReplicator {
    program: PathBuf,
    extra: Vec<String>,
}

impl RsyncReplicator {
    pub fn new(program: &Path, extra: &[String]) -> Self {
        Self {
            program: program.to_path_buf(),
            extra: extra.to_vec(),
        }
    }

    pub fn command(&self, request: &TransferRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(rsync_args(request, &self.extra))
            .stdin(Stdio::null());
        set_child_umask(&mut cmd, Mode::from_bits_truncate(BACKUP_UMASK));
        cmd
    }
}

impl Replicator for RsyncReplicator {
    fn replicate(&self, request: &TransferRequest) -> Result<i32> {
        let mut cmd = self.command(request);
        run_command(&mut cmd)
    }
}

pub fn rsync_args(request: &TransferRequest, extra: &[String]) -> Vec<String> {
    let mut args = vec![
        "-a".to_string(),
        format!("{}/.", request.source.display()),
    ];
    if let Some(reference) = &request.reference {
        args.push(format!("--link-dest={}", reference.display()));
    }
    if let Some(log) = &request.log_file {
        args.push(format!("--log-file={}", log.display()));
    }
    args.extend(extra.iter().cloned());
    args.push(request.dest.to_string_lossy().to_string());
    args
}
