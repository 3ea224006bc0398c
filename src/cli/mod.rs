use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::args::{Cli, Command};
use crate::cli::commands::{exit_for_error, maintenance, pending, recover, run, status, EXIT_USAGE};
use crate::config::load::load_config;

const CONFIG_FILE: &str = "/etc/snapvault.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const LICENSE_NAME: &str = "GNU GPL v3 or later";

pub mod args;
pub mod commands;

pub fn run() -> Result<()> {
    let (cli, rsync_extra) = parse_cli();

    print_banner();
    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("License: {}", LICENSE_NAME);
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let config = load_config(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    init_tracing(cli.verbose || config.verbose);
    tracing::debug!(
        config = %config_path.display(),
        instance = %config.instance,
        target_dir = %config.target_dir.display(),
        "configuration loaded"
    );

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run::run_queue(&config, &rsync_extra),
        Command::Recover => recover::run_recover(&config),
        Command::Pending => pending::list_pending(&config),
        Command::Status => status::show_status(&config),
        Command::ClearMaintenance => maintenance::clear_maintenance(&config),
    };
    if let Err(err) = result {
        exit_for_error(&err);
    }
    Ok(())
}

fn parse_cli() -> (Cli, Vec<String>) {
    let raw: Vec<String> = env::args().collect();
    let (args, rsync_extra) = split_rsync_args(raw);
    match Cli::try_parse_from(args) {
        Ok(cli) => (cli, rsync_extra),
        Err(err) => {
            if err.kind() == ErrorKind::UnknownArgument {
                if let Some(arg) = err.context().find_map(|c| {
                    if let clap::error::ContextKind::InvalidArg = c.0 {
                        Some(c.1.to_string())
                    } else {
                        None
                    }
                }) {
                    println!("unknown option {}", arg);
                    std::process::exit(EXIT_USAGE);
                }
            }
            println!("{}", err);
            std::process::exit(EXIT_USAGE);
        }
    }
}

/// Everything after `--rsync` is passed to the transfer tool unchanged.
fn split_rsync_args(raw: Vec<String>) -> (Vec<String>, Vec<String>) {
    let mut args = Vec::new();
    let mut rsync_extra = Vec::new();
    let mut iter = raw.into_iter();
    if let Some(bin) = iter.next() {
        args.push(bin);
    }
    let mut in_rsync = false;
    for arg in iter {
        if in_rsync {
            rsync_extra.push(arg);
            continue;
        }
        if arg == "--rsync" {
            in_rsync = true;
            continue;
        }
        args.push(arg);
    }
    (args, rsync_extra)
}

fn print_banner() {
    println!("snapvault {}", VERSION);
}

fn print_help() {
    println!("Usage:");
    println!("  snapvault [run] [options] [--rsync <args...>]");
    println!("  snapvault recover [options]");
    println!("  snapvault pending [options]");
    println!("  snapvault status [options]");
    println!("  snapvault clear-maintenance [options]");
    println!("  snapvault --version");
    println!();
    println!("Options:");
    println!("  --config <path>        Config file path (default {})", CONFIG_FILE);
    println!("  --verbose              Verbose logging");
    println!("  --rsync <args...>      Pass remaining args to rsync");
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
