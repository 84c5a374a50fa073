//! notesync-core - offline-first storage and sync for notes and groups
//!
//! Clients mutate entities through [`LocalStore`], which commits each change
//! together with a durable queue entry. [`SyncEngine`] drains that queue to a
//! [`RemoteClient`] and pulls remote changes back, resolving conflicts by
//! version.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{ConfigError, RemoteConfig, SyncConfig};
pub use error::{Error, Result};
pub use models::{
    Entity, EntityChanges, EntityFields, EntityTable, GroupChanges, GroupFields, HistoryEntry,
    HistoryOp, LocalId, NoteChanges, NoteFields, Operation, QueueEntry, RestoreResult,
    SyncFailure, SyncState,
};
pub use remote::{HttpRemoteClient, RemoteClient, RemoteError, Session};
pub use services::LocalStore;
pub use state::{CycleReport, SyncPhase, SyncStatus};
pub use sync::{SyncEngine, SyncTrigger, TriggerSource};
