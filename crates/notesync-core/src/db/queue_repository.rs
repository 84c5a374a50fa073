//! Mutation queue repository

use crate::error::Result;
use crate::models::{EntityTable, LocalId, Operation, Payload, QueueEntry};
use rusqlite::{params, Connection, OptionalExtension};

const QUEUE_COLUMNS: &str =
    "id, operation, entity_table, local_id, payload, created_at, in_flight";

/// Durable FIFO of pending local changes
pub struct QueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> QueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append an entry; call inside the transaction that mutated the entity
    pub fn enqueue(
        &self,
        operation: Operation,
        table: EntityTable,
        local_id: LocalId,
        payload: &Payload,
        now: i64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO mutation_queue (operation, entity_table, local_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                operation.as_str(),
                table.as_str(),
                local_id.get(),
                serde_json::to_string(payload)?,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All pending entries, oldest first
    pub fn drain(&self) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM mutation_queue ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map([], Self::parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawEntry::into_entry).collect()
    }

    /// Oldest pending entry
    pub fn next(&self) -> Result<Option<QueueEntry>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM mutation_queue ORDER BY id ASC LIMIT 1"),
                [],
                Self::parse_row,
            )
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }

    /// Pending create entry for an entity, if any
    pub fn pending_create(&self, local_id: LocalId) -> Result<Option<QueueEntry>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {QUEUE_COLUMNS} FROM mutation_queue
                     WHERE local_id = ?1 AND operation = 'create'
                     ORDER BY id ASC LIMIT 1"
                ),
                params![local_id.get()],
                Self::parse_row,
            )
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }

    /// Claim or release an entry for the push phase
    pub fn set_in_flight(&self, id: i64, in_flight: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE mutation_queue SET in_flight = ?1 WHERE id = ?2",
            params![i32::from(in_flight), id],
        )?;
        Ok(())
    }

    /// Release every claim; claims never survive a restart
    pub fn clear_in_flight(&self) -> Result<usize> {
        Ok(self
            .conn
            .execute("UPDATE mutation_queue SET in_flight = 0 WHERE in_flight = 1", [])?)
    }

    /// Remove an acknowledged (or permanently rejected) entry
    pub fn acknowledge(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM mutation_queue WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Drop every entry for an entity (create/delete collapse)
    pub fn discard_for(&self, local_id: LocalId) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM mutation_queue WHERE local_id = ?1",
            params![local_id.get()],
        )?)
    }

    /// Number of pending entries
    pub fn count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM mutation_queue", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
        Ok(RawEntry {
            id: row.get(0)?,
            operation: row.get(1)?,
            table: row.get(2)?,
            local_id: row.get(3)?,
            payload: row.get(4)?,
            created_at: row.get(5)?,
            in_flight: row.get::<_, i32>(6)? != 0,
        })
    }
}

/// Row as stored, before enum and JSON decoding
struct RawEntry {
    id: i64,
    operation: String,
    table: String,
    local_id: i64,
    payload: String,
    created_at: i64,
    in_flight: bool,
}

impl RawEntry {
    fn into_entry(self) -> Result<QueueEntry> {
        Ok(QueueEntry {
            id: self.id,
            operation: self.operation.parse()?,
            table: self.table.parse()?,
            local_id: LocalId::new(self.local_id),
            payload: serde_json::from_str(&self.payload)?,
            created_at: self.created_at,
            in_flight: self.in_flight,
        })
    }
}
