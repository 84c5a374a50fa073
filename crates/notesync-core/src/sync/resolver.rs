//! Version-based conflict resolution between a local row and its remote copy.

use crate::models::{Entity, HistoryOp, Snapshot};

/// What a pull should do with one remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Both sides already agree
    Unchanged,
    /// Overwrite local state; `loser` is the local state worth keeping in history
    RemoteWins { loser: Option<(HistoryOp, Snapshot)> },
    /// Keep local state and push it again at `push_version` or above
    LocalWins { push_version: i64 },
}

/// Higher version wins; equal versions go to the later `updated_at`, and a
/// full tie goes to the remote so every replica settles on the same row.
pub fn resolve(local: &Entity, remote: &Entity) -> Resolution {
    let same_content = local.same_content(remote);
    if local.version == remote.version && same_content {
        return Resolution::Unchanged;
    }

    let remote_wins = remote.version > local.version
        || (remote.version == local.version && remote.updated_at >= local.updated_at);

    if remote_wins {
        let loser = (!same_content).then(|| {
            let op = if remote.is_deleted && !local.is_deleted {
                HistoryOp::Delete
            } else {
                HistoryOp::Update
            };
            (op, local.snapshot())
        });
        Resolution::RemoteWins { loser }
    } else if same_content {
        Resolution::Unchanged
    } else {
        Resolution::LocalWins {
            push_version: local.version.max(remote.version + 1),
        }
    }
}
