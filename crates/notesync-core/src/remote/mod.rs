//! Remote backend client: the row-level API the sync engine talks to.

mod http;
#[cfg(test)]
pub(crate) mod memory;

pub use http::HttpRemoteClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EntityTable, Payload, SyncCursor};

/// Remote call failure, split by whether retrying can help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// No connectivity, timeout, 5xx; retried with backoff
    #[error("Transient network error: {0}")]
    Transient(String),
    /// Validation failure or other 4xx; never retried
    #[error("Rejected by remote: {0}")]
    Rejected(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Authenticated owner context for remote calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub owner_id: String,
    pub access_token: String,
}

impl Session {
    pub fn new(owner_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            access_token: access_token.into(),
        }
    }

    /// Both values present after trimming
    pub fn is_complete(&self) -> bool {
        !self.owner_id.trim().is_empty() && !self.access_token.trim().is_empty()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Session")
            .field("owner_id", &self.owner_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// One row as returned by the remote backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub version: i64,
    /// Server insertion sequence, bumped on every write
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
    /// Entity-specific columns
    #[serde(flatten)]
    pub fields: Payload,
}

impl RemoteRecord {
    pub const fn cursor(&self) -> SyncCursor {
        SyncCursor::new(self.updated_at, self.seq)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(serde_json::Value::as_str)
    }
}

/// Row-level API over the remote store; every call is scoped to `session.owner_id`.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Rows with `(updated_at, seq)` strictly after `cursor`, ascending, deleted rows included
    async fn list_since(
        &self,
        session: &Session,
        table: EntityTable,
        cursor: Option<SyncCursor>,
        limit: usize,
    ) -> RemoteResult<Vec<RemoteRecord>>;

    /// Insert a row; the server assigns `id`, `version` and timestamps
    async fn insert(
        &self,
        session: &Session,
        table: EntityTable,
        fields: &Payload,
    ) -> RemoteResult<RemoteRecord>;

    /// Update the given fields of one row
    async fn update_by_id(
        &self,
        session: &Session,
        table: EntityTable,
        remote_id: &str,
        fields: &Payload,
    ) -> RemoteResult<RemoteRecord>;

    /// Soft-delete one row
    async fn mark_deleted(
        &self,
        session: &Session,
        table: EntityTable,
        remote_id: &str,
    ) -> RemoteResult<RemoteRecord>;
}
