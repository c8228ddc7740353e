use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Caller-facing category of a [`LeaseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    InsufficientResources,
    ResourceConflict,
    LockTimeout,
    StateIo,
}

#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Invalid lease request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient resources: requested {requested} cores but only {available} of {total} are free")]
    InsufficientResources {
        requested: u32,
        available: u32,
        total: u32,
    },

    #[error("Cores {cores:?} are already leased")]
    ResourceConflict { cores: Vec<u32> },

    #[error("Timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Failed to lock {}: {source}", path.display())]
    LockFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read lease state {}: {source}", path.display())]
    StateReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write lease state {}: {source}", path.display())]
    StateWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt lease state {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },
}

impl LeaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LeaseError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            LeaseError::InsufficientResources { .. } => ErrorKind::InsufficientResources,
            LeaseError::ResourceConflict { .. } => ErrorKind::ResourceConflict,
            LeaseError::LockTimeout { .. } => ErrorKind::LockTimeout,
            LeaseError::LockFailed { .. }
            | LeaseError::StateReadFailed { .. }
            | LeaseError::StateWriteFailed { .. }
            | LeaseError::CorruptState { .. } => ErrorKind::StateIo,
        }
    }
}

pub type Result<T> = std::result::Result<T, LeaseError>;
