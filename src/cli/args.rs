use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "snapvault", disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, short = 'h')]
    pub help: bool,
    #[arg(long)]
    pub version: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Replicate every pending snapshot.
    Run,
    /// Release dangling holds and remove orphaned partial transfers.
    Recover,
    /// List snapshots waiting to be replicated.
    Pending,
    /// Show the last published status and the state of the backup device.
    Status,
    /// Allow automatic runs again after a fatal error.
    ClearMaintenance,
}
