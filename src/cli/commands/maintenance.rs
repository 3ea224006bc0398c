use crate::config::model::RuntimeConfig;
use crate::error::Result;
use crate::maintenance::Maintenance;

pub fn clear_maintenance(config: &RuntimeConfig) -> Result<()> {
    let maintenance = Maintenance::new(&config.state_dir);
    if let Some(record) = maintenance.current()? {
        println!("clearing maintenance state: {}", record.reason);
    }
    if maintenance.clear()? {
        tracing::info!(path = %maintenance.path().display(), "maintenance state cleared");
        println!("automatic backups enabled");
    } else {
        println!("not in maintenance state");
    }
    Ok(())
}
