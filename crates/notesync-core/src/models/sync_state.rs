//! Persisted sync bookkeeping models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityTable, LocalId, Operation};

/// High-water mark over a remote table: `(updated_at, seq)` of the last row seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncCursor {
    pub updated_at: DateTime<Utc>,
    /// Server insertion sequence; breaks ties within one timestamp
    pub seq: i64,
}

impl SyncCursor {
    pub const fn new(updated_at: DateTime<Utc>, seq: i64) -> Self {
        Self { updated_at, seq }
    }
}

/// Persisted single-row engine state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Owner the cursors belong to
    pub owner_id: Option<String>,
    pub groups_cursor: Option<SyncCursor>,
    pub notes_cursor: Option<SyncCursor>,
    pub backoff_attempts: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<i64>,
    pub last_success_at: Option<i64>,
}

impl SyncState {
    pub const fn cursor(&self, table: EntityTable) -> Option<SyncCursor> {
        match table {
            EntityTable::Groups => self.groups_cursor,
            EntityTable::Notes => self.notes_cursor,
        }
    }

    pub fn set_cursor(&mut self, table: EntityTable, cursor: Option<SyncCursor>) {
        match table {
            EntityTable::Groups => self.groups_cursor = cursor,
            EntityTable::Notes => self.notes_cursor = cursor,
        }
    }
}

/// A queue entry the remote refused; kept for the user to inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub id: i64,
    pub table: EntityTable,
    pub local_id: LocalId,
    pub operation: Operation,
    pub message: String,
    /// Unix ms
    pub recorded_at: i64,
}
