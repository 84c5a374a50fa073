//! History log model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{EntityFields, EntityTable, LocalId};
use crate::error::Error;

/// Why a snapshot was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOp {
    Create,
    /// Local state overwritten by a winning remote write
    Update,
    /// State just before a soft delete
    Delete,
    /// State just before a restore was applied
    Restore,
}

impl HistoryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for HistoryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "restore" => Ok(Self::Restore),
            other => Err(Error::InvalidInput(format!("unknown history op '{other}'"))),
        }
    }
}

/// User-visible state of an entity at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub fields: EntityFields,
    pub is_deleted: bool,
}

/// Immutable history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub local_id: LocalId,
    pub table: EntityTable,
    pub op: HistoryOp,
    pub snapshot: Snapshot,
    /// Unix ms
    pub recorded_at: i64,
}

/// Outcome of a restore request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestoreResult {
    /// False when the snapshot already matched the current state
    pub applied: bool,
    /// Version after the call
    pub version: i64,
}
