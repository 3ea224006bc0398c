pub mod maintenance;
pub mod pending;
pub mod recover;
pub mod run;
pub mod status;

use crate::error::SnapvaultError;

/// A run stopped before the queue was empty, or was refused because
/// automatic backups are disabled.
pub const EXIT_ABORTED: i32 = 1;
/// Bad invocation or configuration.
pub const EXIT_USAGE: i32 = 2;

pub fn exit_for_error(err: &SnapvaultError) -> ! {
    let code = match err {
        SnapvaultError::Config(_) => EXIT_USAGE,
        _ => EXIT_ABORTED,
    };
    println!("{}", err);
    std::process::exit(code);
}
