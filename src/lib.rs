pub mod cli;
pub mod config;
pub mod error;
pub mod layout;
pub mod linker;
pub mod lock;
pub mod maintenance;
pub mod queue;
pub mod recovery;
pub mod retention;
pub mod signal_handler;
pub mod space;
pub mod status;
pub mod store;
pub mod transfer;
pub mod types;
pub mod util;

#[cfg(test)]
mod testing;
