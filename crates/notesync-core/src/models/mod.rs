//! Data models for notesync

mod entity;
mod history;
mod queue;
mod sync_state;

pub use entity::{
    Entity, EntityChanges, EntityFields, EntityTable, GroupChanges, GroupFields, LocalId,
    NoteChanges, NoteFields, Payload, DEFAULT_GROUP_COLOR,
};
pub use history::{HistoryEntry, HistoryOp, RestoreResult, Snapshot};
pub use queue::{Operation, QueueEntry};
pub use sync_state::{SyncCursor, SyncFailure, SyncState};
