use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};

/// Raises the returned flag on SIGINT or SIGTERM. The queue checks it
/// between steps; a transfer already running sees the signal itself and
/// exits as interrupted.
pub fn stop_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            tracing::warn!(error = %err, "signal handler setup failed");
            return stop;
        }
    };
    let flag = Arc::clone(&stop);
    thread::spawn(move || {
        for signal in signals.forever() {
            tracing::warn!(signal, "stop requested; finishing current step");
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}
