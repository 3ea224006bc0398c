use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus};

use nix::sys::stat::{umask, Mode};

use crate::error::{Result, SnapvaultError, StoreError};

/// Exit code reported for a child that died from a signal.
pub const SIGNALED_EXIT_CODE: i32 = 20;

pub fn describe_command(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy();
    let args: Vec<String> = cmd
        .get_args()
        .map(|a| a.to_string_lossy().to_string())
        .collect();
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None if status.signal().is_some() => SIGNALED_EXIT_CODE,
        None => 1,
    }
}

/// Starts the child with file mode creation mask `mask`. The parent's mask
/// is left alone.
pub fn set_child_umask(cmd: &mut Command, mask: Mode) -> &mut Command {
    // umask(2) is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            umask(mask);
            Ok(())
        })
    }
}

/// Runs a command to completion with inherited stdio and returns its exit code.
pub fn run_command(cmd: &mut Command) -> Result<i32> {
    let line = describe_command(cmd);
    tracing::debug!(command = %line, "exec");
    let status = cmd
        .status()
        .map_err(|e| SnapvaultError::message(format!("{}: {}", line, e)))?;
    Ok(exit_code(status))
}

/// Runs a command, returning stdout. A non-zero exit is a `StoreError`.
pub fn capture_output(cmd: &mut Command) -> Result<String> {
    let line = describe_command(cmd);
    tracing::trace!(command = %line, "exec");
    let output = cmd
        .output()
        .map_err(|e| SnapvaultError::message(format!("{}: {}", line, e)))?;
    if !output.status.success() {
        return Err(StoreError::Command {
            command: line,
            code: exit_code(output.status),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
