//! Entity repository: notes, groups, and the local/remote id mapping

use crate::error::{Error, Result};
use crate::models::{Entity, EntityFields, EntityTable, GroupFields, LocalId, NoteFields};
use rusqlite::{params, Connection, OptionalExtension};

const GROUP_COLUMNS: &str = "g.local_id, m.remote_id, g.version, g.created_at, g.updated_at, g.is_deleted, g.name, g.color";
const NOTE_COLUMNS: &str = "n.local_id, m.remote_id, n.version, n.created_at, n.updated_at, n.is_deleted, n.title, n.content, n.group_local_id";

/// `SQLite` access to entity rows; works on a plain connection or inside a transaction
pub struct EntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> EntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Allocate a local id and insert the entity row.
    ///
    /// `remote_id` is set when the row originates from a pull.
    pub fn insert(
        &self,
        fields: &EntityFields,
        remote_id: Option<&str>,
        version: i64,
        created_at: i64,
        updated_at: i64,
        is_deleted: bool,
    ) -> Result<Entity> {
        let table = fields.table();
        self.conn.execute(
            "INSERT INTO id_map (entity_table, remote_id) VALUES (?1, ?2)",
            params![table.as_str(), remote_id],
        )?;
        let local_id = LocalId::new(self.conn.last_insert_rowid());

        let entity = Entity {
            local_id,
            remote_id: remote_id.map(ToString::to_string),
            version,
            created_at,
            updated_at,
            is_deleted,
            fields: fields.clone(),
        };

        match &entity.fields {
            EntityFields::Group(group) => {
                self.conn.execute(
                    "INSERT INTO groups (local_id, name, color, version, created_at, updated_at, is_deleted)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        local_id.get(),
                        group.name,
                        group.color,
                        version,
                        created_at,
                        updated_at,
                        i32::from(is_deleted)
                    ],
                )?;
            }
            EntityFields::Note(note) => {
                self.conn.execute(
                    "INSERT INTO notes (local_id, title, content, group_local_id, version, created_at, updated_at, is_deleted)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        local_id.get(),
                        note.title,
                        note.content,
                        note.group_id.get(),
                        version,
                        created_at,
                        updated_at,
                        i32::from(is_deleted)
                    ],
                )?;
            }
        }

        Ok(entity)
    }

    /// Table an id belongs to
    pub fn table_of(&self, local_id: LocalId) -> Result<Option<EntityTable>> {
        let table: Option<String> = self
            .conn
            .query_row(
                "SELECT entity_table FROM id_map WHERE local_id = ?1",
                params![local_id.get()],
                |row| row.get(0),
            )
            .optional()?;
        table.map(|name| name.parse()).transpose()
    }

    /// Fetch an entity by local id, including soft-deleted rows
    pub fn get(&self, local_id: LocalId) -> Result<Option<Entity>> {
        let Some(table) = self.table_of(local_id)? else {
            return Ok(None);
        };

        let result = match table {
            EntityTable::Groups => self.conn.query_row(
                &format!(
                    "SELECT {GROUP_COLUMNS} FROM groups g JOIN id_map m ON m.local_id = g.local_id
                     WHERE g.local_id = ?1"
                ),
                params![local_id.get()],
                Self::parse_group,
            ),
            EntityTable::Notes => self.conn.query_row(
                &format!(
                    "SELECT {NOTE_COLUMNS} FROM notes n JOIN id_map m ON m.local_id = n.local_id
                     WHERE n.local_id = ?1"
                ),
                params![local_id.get()],
                Self::parse_note,
            ),
        };

        Ok(result.optional()?)
    }

    /// Fetch a live (non-deleted) entity or fail with `NotFound`
    pub fn get_live(&self, local_id: LocalId) -> Result<Entity> {
        self.get(local_id)?
            .filter(|entity| !entity.is_deleted)
            .ok_or_else(|| Error::NotFound(format!("entity {local_id}")))
    }

    /// Local id mapped to a remote id in the given table
    pub fn local_id_for_remote(
        &self,
        table: EntityTable,
        remote_id: &str,
    ) -> Result<Option<LocalId>> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT local_id FROM id_map WHERE entity_table = ?1 AND remote_id = ?2",
                params![table.as_str(), remote_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(LocalId::new))
    }

    /// Remote id currently mapped to a local id
    pub fn remote_id_of(&self, local_id: LocalId) -> Result<Option<String>> {
        let remote_id: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT remote_id FROM id_map WHERE local_id = ?1",
                params![local_id.get()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(remote_id.flatten())
    }

    /// Record the remote id assigned on first push
    pub fn set_remote_id(&self, local_id: LocalId, remote_id: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE id_map SET remote_id = ?1 WHERE local_id = ?2",
            params![remote_id, local_id.get()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("entity {local_id}")));
        }
        Ok(())
    }

    /// Persist every mutable column of an existing entity
    pub fn write(&self, entity: &Entity) -> Result<()> {
        let rows = match &entity.fields {
            EntityFields::Group(group) => self.conn.execute(
                "UPDATE groups SET name = ?1, color = ?2, version = ?3, updated_at = ?4, is_deleted = ?5
                 WHERE local_id = ?6",
                params![
                    group.name,
                    group.color,
                    entity.version,
                    entity.updated_at,
                    i32::from(entity.is_deleted),
                    entity.local_id.get()
                ],
            )?,
            EntityFields::Note(note) => self.conn.execute(
                "UPDATE notes SET title = ?1, content = ?2, group_local_id = ?3, version = ?4, updated_at = ?5, is_deleted = ?6
                 WHERE local_id = ?7",
                params![
                    note.title,
                    note.content,
                    note.group_id.get(),
                    entity.version,
                    entity.updated_at,
                    i32::from(entity.is_deleted),
                    entity.local_id.get()
                ],
            )?,
        };

        if rows == 0 {
            return Err(Error::NotFound(format!("entity {}", entity.local_id)));
        }
        Ok(())
    }

    /// Raise the stored version without touching data (after a remote ack)
    pub fn raise_version(&self, local_id: LocalId, version: i64) -> Result<()> {
        let Some(table) = self.table_of(local_id)? else {
            return Err(Error::NotFound(format!("entity {local_id}")));
        };
        self.conn.execute(
            &format!(
                "UPDATE {} SET version = MAX(version, ?1) WHERE local_id = ?2",
                table.as_str()
            ),
            params![version, local_id.get()],
        )?;
        Ok(())
    }

    /// List a table, most recently updated first
    pub fn list(&self, table: EntityTable, include_deleted: bool) -> Result<Vec<Entity>> {
        let deleted_filter = if include_deleted {
            ""
        } else {
            "WHERE is_deleted = 0"
        };

        let entities = match table {
            EntityTable::Groups => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {GROUP_COLUMNS} FROM groups g JOIN id_map m ON m.local_id = g.local_id
                     {deleted_filter} ORDER BY g.updated_at DESC, g.local_id DESC"
                ))?;
                let rows = stmt
                    .query_map([], Self::parse_group)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            EntityTable::Notes => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {NOTE_COLUMNS} FROM notes n JOIN id_map m ON m.local_id = n.local_id
                     {deleted_filter} ORDER BY n.updated_at DESC, n.local_id DESC"
                ))?;
                let rows = stmt
                    .query_map([], Self::parse_note)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        Ok(entities)
    }

    fn parse_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
        Ok(Entity {
            local_id: LocalId::new(row.get(0)?),
            remote_id: row.get(1)?,
            version: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            is_deleted: row.get::<_, i32>(5)? != 0,
            fields: EntityFields::Group(GroupFields {
                name: row.get(6)?,
                color: row.get(7)?,
            }),
        })
    }

    fn parse_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
        Ok(Entity {
            local_id: LocalId::new(row.get(0)?),
            remote_id: row.get(1)?,
            version: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            is_deleted: row.get::<_, i32>(5)? != 0,
            fields: EntityFields::Note(NoteFields {
                title: row.get(6)?,
                content: row.get(7)?,
                group_id: LocalId::new(row.get(8)?),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn work_group() -> EntityFields {
        EntityFields::Group(GroupFields {
            name: "Work".to_string(),
            color: "#3366ff".to_string(),
        })
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup();
        let repo = EntityRepository::new(db.connection());

        let group = repo.insert(&work_group(), None, 1, 10, 10, false).unwrap();
        let note = repo
            .insert(
                &EntityFields::Note(NoteFields {
                    title: "Standup".to_string(),
                    content: "notes".to_string(),
                    group_id: group.local_id,
                }),
                None,
                1,
                11,
                11,
                false,
            )
            .unwrap();

        assert_ne!(group.local_id, note.local_id);
        assert_eq!(repo.get(note.local_id).unwrap(), Some(note.clone()));
        assert_eq!(
            repo.table_of(note.local_id).unwrap(),
            Some(EntityTable::Notes)
        );
    }

    #[test]
    fn test_remote_id_mapping() {
        let db = setup();
        let repo = EntityRepository::new(db.connection());

        let group = repo.insert(&work_group(), None, 1, 10, 10, false).unwrap();
        assert_eq!(repo.remote_id_of(group.local_id).unwrap(), None);

        repo.set_remote_id(group.local_id, "g-100").unwrap();
        assert_eq!(
            repo.local_id_for_remote(EntityTable::Groups, "g-100")
                .unwrap(),
            Some(group.local_id)
        );
        assert_eq!(
            repo.local_id_for_remote(EntityTable::Notes, "g-100").unwrap(),
            None
        );
    }

    #[test]
    fn test_list_hides_deleted_by_default() {
        let db = setup();
        let repo = EntityRepository::new(db.connection());

        let mut group = repo.insert(&work_group(), None, 1, 10, 10, false).unwrap();
        group.is_deleted = true;
        group.version = 2;
        repo.write(&group).unwrap();

        assert!(repo.list(EntityTable::Groups, false).unwrap().is_empty());
        assert_eq!(repo.list(EntityTable::Groups, true).unwrap().len(), 1);
        assert!(matches!(
            repo.get_live(group.local_id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_raise_version_never_lowers() {
        let db = setup();
        let repo = EntityRepository::new(db.connection());

        let group = repo.insert(&work_group(), None, 4, 10, 10, false).unwrap();
        repo.raise_version(group.local_id, 2).unwrap();
        assert_eq!(repo.get(group.local_id).unwrap().unwrap().version, 4);

        repo.raise_version(group.local_id, 6).unwrap();
        assert_eq!(repo.get(group.local_id).unwrap().unwrap().version, 6);
    }
}
