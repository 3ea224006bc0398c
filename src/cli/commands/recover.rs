use crate::config::model::RuntimeConfig;
use crate::error::Result;
use crate::layout::BackupLayout;
use crate::lock::ReferenceLock;
use crate::recovery::recover;
use crate::store::ZfsStore;
use crate::util::paths::ensure_private_dir;

pub fn run_recover(config: &RuntimeConfig) -> Result<()> {
    ensure_private_dir(&config.state_dir)?;
    let Some(instance_lock) = ReferenceLock::try_acquire(&config.instance_lock_path())? else {
        println!("snapvault instance {} is running; not recovering", config.instance);
        return Ok(());
    };

    let layout = BackupLayout::new(&config.target_dir, &config.hostname);
    let mut store = ZfsStore::new();
    let report = recover(&mut store, &layout, &config.property_name())?;
    instance_lock.release();

    for snapshot in &report.released {
        println!("released hold on {}", snapshot);
    }
    for partial in &report.zombies {
        println!("removed {}", partial.display());
    }
    for partial in &report.resumable {
        println!("kept {} for resume", partial.display());
    }
    if report.released.is_empty() && report.zombies.is_empty() {
        println!("nothing to recover");
    }
    Ok(())
}
