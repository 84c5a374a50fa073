//! Process-wide sync status observed passively by clients.

use serde::Serialize;

use crate::models::SyncFailure;

/// Maximum number of rejected-entry failures kept in [`SyncStatus::recent_failures`].
pub const RECENT_FAILURES_LIMIT: usize = 20;

/// Phase of the sync engine's state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Engine not started (or stopped).
    #[default]
    Stopped,
    Idle,
    Pushing,
    Pulling,
    BackingOff,
}

impl SyncPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Idle => "idle",
            Self::Pushing => "pushing",
            Self::Pulling => "pulling",
            Self::BackingOff => "backing_off",
        }
    }
}

/// Counters for one completed sync cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Queue entries acknowledged by the remote.
    pub pushed: usize,
    /// Queue entries dropped after a rejection.
    pub rejected: usize,
    /// Remote records received during pull.
    pub pulled: usize,
    /// Pulled records that changed local state.
    pub applied: usize,
    /// Pulled records skipped as unapplicable.
    pub skipped: usize,
    /// Pulled records where local state won and was queued for re-push.
    pub local_wins: usize,
}

/// Snapshot of the engine's externally visible state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Number of cycles that have begun since start.
    pub cycles_started: u64,
    /// Number of cycles that have finished (successfully or not) since start.
    pub cycles_finished: u64,
    /// Consecutive failed cycles; zero after any successful cycle.
    pub backoff_attempts: u32,
    /// When the next retry fires while backing off (Unix ms).
    pub retry_at: Option<i64>,
    pub last_error: Option<String>,
    pub last_error_at: Option<i64>,
    pub last_success_at: Option<i64>,
    /// Queue length observed at the end of the last cycle.
    pub pending_mutations: usize,
    pub last_cycle: Option<CycleReport>,
    /// Entries rejected by the remote, newest last.
    pub recent_failures: Vec<SyncFailure>,
}

impl SyncStatus {
    pub(crate) fn push_failure(&mut self, failure: SyncFailure) {
        self.recent_failures.push(failure);
        if self.recent_failures.len() > RECENT_FAILURES_LIMIT {
            let overflow = self.recent_failures.len() - RECENT_FAILURES_LIMIT;
            self.recent_failures.drain(..overflow);
        }
    }
}
