use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] notesync_core::Error),
    #[error(transparent)]
    Config(#[from] notesync_core::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No note content provided")]
    EmptyContent,
    #[error("Edited note content cannot be empty")]
    EmptyEditedContent,
    #[error("Invalid id: {0}")]
    InvalidId(String),
    #[error("Nothing found for id {0}")]
    EntityNotFound(String),
    #[error("{0}")]
    InvalidEdit(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Sync is not configured. Set {0} (see NOTESYNC_* variables in .env).")]
    SyncNotConfigured(&'static str),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
}
