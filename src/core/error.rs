use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocmoveError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Unable to acquire lock (held by '{holder}')")]
    LockAcquisitionDenied { holder: String },
    #[error("Unable to release lock acquired by another process")]
    LockReleaseError,
    #[error(
        "Change log version '{version}' checksum doesn't match, verify whether script '{script}' was modified"
    )]
    ChecksumIntegrityError { version: String, script: String },
    #[error("Unable to apply change log '{version}::{description}': {reason}")]
    ExecutionError {
        version: String,
        description: String,
        reason: String,
    },
    #[error("Change source error: {0}")]
    DiscoverySourceError(String),
    #[error("Concurrent modification of document '{key}'")]
    ConflictError { key: String },
    #[error("Validation error: {0}")]
    ValidationError(String),
}
