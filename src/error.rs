//! Top-level error type.

use thiserror::Error;

use crate::archive::ArchiveError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Unable to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
