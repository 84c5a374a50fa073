//! Error types for notesync-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::RemoteError;

/// Result type alias using notesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in notesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store failure (disk, constraint, transaction)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity, history entry, or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or malformed configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Remote backend call failed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A pulled record could not be applied locally
    #[error("Cannot apply remote record {remote_id}: {reason}")]
    ConflictApply { remote_id: String, reason: String },

    /// The sync engine has not been started or was stopped
    #[error("Sync engine is not running")]
    EngineNotRunning,
}

impl Error {
    /// Whether a sync cycle hitting this error should back off and retry.
    ///
    /// Transient network failures and local storage failures both leave the
    /// store at its last committed state, so retrying later is safe.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Remote(RemoteError::Transient(_)) | Self::Sqlite(_) | Self::Io(_)
        )
    }
}
