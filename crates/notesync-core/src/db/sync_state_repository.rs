//! Sync state repository: cursors, backoff counters, and rejected pushes

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{EntityTable, LocalId, Operation, SyncCursor, SyncFailure, SyncState};

/// Rejected pushes kept in `sync_failures`; older rows are trimmed on insert
pub const FAILURE_RETENTION: i64 = 200;

/// Access to the single-row `sync_state` record and the `sync_failures` log
pub struct SyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Load the persisted state
    pub fn load(&self) -> Result<SyncState> {
        let raw = self.conn.query_row(
            "SELECT owner_id, groups_cursor_at, groups_cursor_seq, notes_cursor_at, notes_cursor_seq,
                    backoff_attempts, last_error, last_error_at, last_success_at
             FROM sync_state WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                    row.get::<_, Option<i64>>(8)?,
                ))
            },
        )?;

        let (
            owner_id,
            groups_at,
            groups_seq,
            notes_at,
            notes_seq,
            backoff_attempts,
            last_error,
            last_error_at,
            last_success_at,
        ) = raw;

        Ok(SyncState {
            owner_id,
            groups_cursor: decode_cursor(groups_at, groups_seq)?,
            notes_cursor: decode_cursor(notes_at, notes_seq)?,
            backoff_attempts: u32::try_from(backoff_attempts).unwrap_or_default(),
            last_error,
            last_error_at,
            last_success_at,
        })
    }

    /// Persist the whole record
    pub fn save(&self, state: &SyncState) -> Result<()> {
        let (groups_at, groups_seq) = encode_cursor(state.groups_cursor);
        let (notes_at, notes_seq) = encode_cursor(state.notes_cursor);
        self.conn.execute(
            "UPDATE sync_state SET owner_id = ?1, groups_cursor_at = ?2, groups_cursor_seq = ?3,
                    notes_cursor_at = ?4, notes_cursor_seq = ?5, backoff_attempts = ?6,
                    last_error = ?7, last_error_at = ?8, last_success_at = ?9
             WHERE id = 1",
            params![
                state.owner_id,
                groups_at,
                groups_seq,
                notes_at,
                notes_seq,
                i64::from(state.backoff_attempts),
                state.last_error,
                state.last_error_at,
                state.last_success_at
            ],
        )?;
        Ok(())
    }

    /// Advance one table's cursor without touching the rest of the record
    pub fn save_cursor(&self, table: EntityTable, cursor: SyncCursor) -> Result<()> {
        let (at, seq) = encode_cursor(Some(cursor));
        let sql = match table {
            EntityTable::Groups => {
                "UPDATE sync_state SET groups_cursor_at = ?1, groups_cursor_seq = ?2 WHERE id = 1"
            }
            EntityTable::Notes => {
                "UPDATE sync_state SET notes_cursor_at = ?1, notes_cursor_seq = ?2 WHERE id = 1"
            }
        };
        self.conn.execute(sql, params![at, seq])?;
        Ok(())
    }

    /// Persist a rejected push
    pub fn record_failure(
        &self,
        table: EntityTable,
        local_id: LocalId,
        operation: Operation,
        message: &str,
        now: i64,
    ) -> Result<SyncFailure> {
        self.conn.execute(
            "INSERT INTO sync_failures (entity_table, local_id, operation, message, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                table.as_str(),
                local_id.get(),
                operation.as_str(),
                message,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn.execute(
            "DELETE FROM sync_failures WHERE id <= ?1 - ?2",
            params![id, FAILURE_RETENTION],
        )?;

        Ok(SyncFailure {
            id,
            table,
            local_id,
            operation,
            message: message.to_string(),
            recorded_at: now,
        })
    }

    /// Recently rejected pushes, newest first
    pub fn list_failures(&self, limit: usize) -> Result<Vec<SyncFailure>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_table, local_id, operation, message, recorded_at
             FROM sync_failures
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(
                params![i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, table, local_id, operation, message, recorded_at)| {
                Ok(SyncFailure {
                    id,
                    table: table.parse()?,
                    local_id: LocalId::new(local_id),
                    operation: operation.parse()?,
                    message,
                    recorded_at,
                })
            })
            .collect()
    }
}

fn encode_cursor(cursor: Option<SyncCursor>) -> (Option<String>, Option<i64>) {
    cursor.map_or((None, None), |cursor| {
        (
            Some(
                cursor
                    .updated_at
                    .to_rfc3339_opts(SecondsFormat::Nanos, true),
            ),
            Some(cursor.seq),
        )
    })
}

fn decode_cursor(at: Option<String>, seq: Option<i64>) -> Result<Option<SyncCursor>> {
    let (Some(at), Some(seq)) = (at, seq) else {
        return Ok(None);
    };
    let updated_at = DateTime::parse_from_rfc3339(&at)
        .map_err(|error| Error::InvalidInput(format!("stored cursor '{at}': {error}")))?
        .with_timezone(&Utc);
    Ok(Some(SyncCursor::new(updated_at, seq)))
}
