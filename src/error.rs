use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapvaultError {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Config(ConfigError),
    #[error("{0}")]
    Store(StoreError),
    #[error("refusing to modify {0}: not inside the backup tree")]
    OutsideBackupTree(PathBuf),
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse config: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{command} failed with exit code {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("unexpected zfs output: {0}")]
    Parse(String),
    #[error("invalid snapshot name {0}")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, SnapvaultError>;

impl SnapvaultError {
    pub fn message(msg: impl Into<String>) -> Self {
        SnapvaultError::Message(msg.into())
    }
}

impl From<ConfigError> for SnapvaultError {
    fn from(err: ConfigError) -> Self {
        SnapvaultError::Config(err)
    }
}

impl From<StoreError> for SnapvaultError {
    fn from(err: StoreError) -> Self {
        SnapvaultError::Store(err)
    }
}
