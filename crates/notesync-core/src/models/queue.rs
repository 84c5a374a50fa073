//! Mutation queue entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{EntityTable, LocalId, Payload};
use crate::error::Error;

/// Kind of pending local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation '{other}'"))),
        }
    }
}

/// A pending local change awaiting remote acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Auto-increment id; defines push order
    pub id: i64,
    pub operation: Operation,
    pub table: EntityTable,
    pub local_id: LocalId,
    /// Changed fields only
    pub payload: Payload,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
    /// Claimed by the push phase
    pub in_flight: bool,
}
