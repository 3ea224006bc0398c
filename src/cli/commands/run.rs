use chrono::Local;

use crate::cli::commands::EXIT_ABORTED;
use crate::config::model::RuntimeConfig;
use crate::error::{Result, SnapvaultError};
use crate::lock::ReferenceLock;
use crate::maintenance::Maintenance;
use crate::queue::{Halt, QueueManager, Services, StepOutcome};
use crate::recovery::recover;
use crate::signal_handler::stop_flag;
use crate::space::StatvfsProbe;
use crate::status::{Fanout, LogBus, StatusBus, StatusFile};
use crate::store::ZfsStore;
use crate::transfer::RsyncReplicator;
use crate::util::paths::ensure_private_dir;

/// Exit code for a run refused because automatic backups are disabled.
fn refusal(maintenance: &Maintenance) -> Result<Option<i32>> {
    let Some(record) = maintenance.current()? else {
        return Ok(None);
    };
    println!("automatic backups disabled since {}: {}", record.since, record.reason);
    println!("check the backup device, then run `snapvault clear-maintenance`");
    Ok(Some(EXIT_ABORTED))
}

pub fn run_queue(config: &RuntimeConfig, rsync_extra: &[String]) -> Result<()> {
    println!("{}", Local::now().format("%d-%m-%Y %H:%M"));

    let maintenance = Maintenance::new(&config.state_dir);
    if let Some(code) = refusal(&maintenance)? {
        std::process::exit(code);
    }

    ensure_private_dir(&config.state_dir)?;
    let Some(instance_lock) = ReferenceLock::try_acquire(&config.instance_lock_path())? else {
        println!("snapvault instance {} is already running", config.instance);
        return Ok(());
    };
    let stop = stop_flag();

    let mut extra = config.rsync_extra.clone();
    extra.extend_from_slice(rsync_extra);
    let buses: Vec<Box<dyn StatusBus>> = vec![
        Box::new(LogBus),
        Box::new(StatusFile::new(&config.status_path())),
    ];
    let services = Services {
        store: Box::new(ZfsStore::new()),
        replicator: Box::new(RsyncReplicator::new(&config.rsync_path, &extra)),
        probe: Box::new(StatvfsProbe),
        bus: Box::new(Fanout(buses)),
    };
    let mut queue = QueueManager::new(config, services);

    let layout = queue.layout().clone();
    let property = config.property_name();
    match recover(queue.store_mut(), &layout, &property) {
        Ok(report) => tracing::info!(
            released = report.released.len(),
            removed = report.zombies.len(),
            resumable = report.resumable.len(),
            "startup recovery finished"
        ),
        Err(err @ SnapvaultError::OutsideBackupTree(_)) => {
            maintenance.enter(&err.to_string())?;
            return Err(err);
        }
        Err(err) => return Err(err),
    }

    let outcome = queue.drain(&stop);
    instance_lock.release();

    for (snapshot, reason) in queue.skipped() {
        println!("skipped {} ({:?})", snapshot, reason);
    }
    match outcome {
        StepOutcome::Halt(Halt::Retry(reason)) => {
            println!("backup stopped, will retry on the next run: {}", reason);
            std::process::exit(EXIT_ABORTED);
        }
        StepOutcome::Halt(Halt::Maintenance(reason)) => {
            println!("backup failed, automatic backups disabled: {}", reason);
            std::process::exit(EXIT_ABORTED);
        }
        StepOutcome::Continue | StepOutcome::QueueEmpty => {}
    }
    println!("{}", Local::now().format("%d-%m-%Y %H:%M"));
    Ok(())
}
