//! History log repository

use crate::error::{Error, Result};
use crate::models::{Entity, EntityTable, HistoryEntry, HistoryOp, LocalId, Snapshot};
use rusqlite::{params, Connection, OptionalExtension};

const HISTORY_COLUMNS: &str = "id, local_id, entity_table, op, snapshot, recorded_at";

/// Append-only snapshot log
pub struct HistoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> HistoryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record the user-visible state of `entity`
    pub fn record(&self, entity: &Entity, op: HistoryOp, now: i64) -> Result<i64> {
        self.record_snapshot(entity.local_id, entity.table(), op, &entity.snapshot(), now)
    }

    /// Record a snapshot captured elsewhere, e.g. a conflict loser
    pub fn record_snapshot(
        &self,
        local_id: LocalId,
        table: EntityTable,
        op: HistoryOp,
        snapshot: &Snapshot,
        now: i64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO history (local_id, entity_table, op, snapshot, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                local_id.get(),
                table.as_str(),
                op.as_str(),
                serde_json::to_string(snapshot)?,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Entries for an entity, most recent first
    pub fn list(&self, local_id: LocalId) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history WHERE local_id = ?1 ORDER BY id DESC"
        ))?;
        let rows = stmt
            .query_map(params![local_id.get()], Self::parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// Single entry by id
    pub fn get(&self, id: i64) -> Result<Option<HistoryEntry>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {HISTORY_COLUMNS} FROM history WHERE id = ?1"),
                params![id],
                Self::parse_row,
            )
            .optional()?;
        row.map(Self::decode).transpose()
    }

    /// Number of entries recorded for an entity
    pub fn count(&self, local_id: LocalId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM history WHERE local_id = ?1",
            params![local_id.get()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn parse_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(i64, i64, String, String, String, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn decode(
        (id, local_id, table, op, snapshot, recorded_at): (i64, i64, String, String, String, i64),
    ) -> Result<HistoryEntry> {
        Ok(HistoryEntry {
            id,
            local_id: LocalId::new(local_id),
            table: table.parse()?,
            op: op.parse()?,
            snapshot: serde_json::from_str(&snapshot)
                .map_err(|error| Error::InvalidInput(format!("history entry {id}: {error}")))?,
            recorded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, EntityRepository};
    use crate::models::{EntityFields, GroupFields};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_and_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let entities = EntityRepository::new(db.connection());
        let history = HistoryRepository::new(db.connection());

        let mut group = entities
            .insert(
                &EntityFields::Group(GroupFields {
                    name: "Work".to_string(),
                    color: "#000000".to_string(),
                }),
                None,
                1,
                0,
                0,
                false,
            )
            .unwrap();
        let created = history.record(&group, HistoryOp::Create, 1).unwrap();

        group.fields = EntityFields::Group(GroupFields {
            name: "Home".to_string(),
            color: "#000000".to_string(),
        });
        let deleted = history.record(&group, HistoryOp::Delete, 2).unwrap();

        let entries = history.list(group.local_id).unwrap();
        assert_eq!(
            entries.iter().map(|entry| entry.id).collect::<Vec<_>>(),
            vec![deleted, created]
        );
        assert_eq!(entries[0].snapshot.fields, group.fields);
        assert_eq!(history.get(created).unwrap().unwrap().op, HistoryOp::Create);
        assert_eq!(history.count(group.local_id).unwrap(), 2);
    }
}
