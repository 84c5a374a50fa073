//! Local-first store shared by clients and the sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, Transaction};
use tokio::sync::{watch, Mutex};

use super::mutations;
use crate::db::{
    Database, EntityRepository, HistoryRepository, QueueRepository, SyncStateRepository,
};
use crate::models::{
    Entity, EntityChanges, EntityFields, EntityTable, GroupFields, HistoryEntry, LocalId,
    NoteFields, QueueEntry, RestoreResult, SyncFailure, SyncState, DEFAULT_GROUP_COLOR,
};
use crate::sync::{SyncTrigger, TriggerSource};
use crate::util::now_millis;
use crate::{Error, Result};

/// Live (non-deleted) rows of each table, republished after every commit.
struct Views {
    groups: watch::Sender<Vec<Entity>>,
    notes: watch::Sender<Vec<Entity>>,
}

impl Views {
    fn load(conn: &Connection) -> Result<Self> {
        let entities = EntityRepository::new(conn);
        let (groups, _) = watch::channel(entities.list(EntityTable::Groups, false)?);
        let (notes, _) = watch::channel(entities.list(EntityTable::Notes, false)?);
        Ok(Self { groups, notes })
    }

    const fn sender(&self, table: EntityTable) -> &watch::Sender<Vec<Entity>> {
        match table {
            EntityTable::Groups => &self.groups,
            EntityTable::Notes => &self.notes,
        }
    }

    fn refresh(&self, conn: &Connection) -> Result<()> {
        let entities = EntityRepository::new(conn);
        for table in EntityTable::ALL {
            let fresh = entities.list(table, false)?;
            self.sender(table).send_if_modified(|current| {
                if *current == fresh {
                    false
                } else {
                    *current = fresh;
                    true
                }
            });
        }
        Ok(())
    }
}

/// Thread-safe handle over the local database.
///
/// Every write runs in one transaction covering the entity, its history and
/// its queue entries, then nudges the sync engine if one is attached.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    views: Arc<Views>,
    trigger: Arc<Mutex<Option<SyncTrigger>>>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };
        Self::from_database(db, Some(db_path))
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Self::from_database(Database::open_in_memory()?, None)
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Result<Self> {
        let released = QueueRepository::new(db.connection()).clear_in_flight()?;
        if released > 0 {
            tracing::info!(released, "Released queue claims left by an interrupted push");
        }
        let views = Views::load(db.connection())?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            views: Arc::new(views),
            trigger: Arc::new(Mutex::new(None)),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        match error {
            Error::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => {
                failure.code == rusqlite::ErrorCode::NotADatabase
            }
            other => other
                .to_string()
                .to_ascii_lowercase()
                .contains("file is not a database"),
        }
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = now_millis();
            let base_name = db_path
                .file_name()
                .map_or_else(|| "notesync.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        for suffix in ["-wal", "-shm", "-journal"] {
            let mut sidecar = db_path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.is_file() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale database file {}", sidecar.display());
            }
        }
        Ok(())
    }

    /// Run `op` in one write transaction and republish the read models on commit.
    pub(crate) async fn write<T>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut db = self.db.lock().await;
        let value = {
            let tx = db.transaction()?;
            let value = op(&tx)?;
            tx.commit()?;
            value
        };
        if let Err(error) = self.views.refresh(db.connection()) {
            tracing::warn!("Failed to refresh read models after commit: {error}");
        }
        Ok(value)
    }

    pub(crate) async fn read<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.db.lock().await;
        op(db.connection())
    }

    /// Load-modify-save the single sync state row; no read model refresh.
    pub(crate) async fn update_sync_state<T>(
        &self,
        op: impl FnOnce(&mut SyncState) -> T,
    ) -> Result<T> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let value = {
            let repo = SyncStateRepository::new(&tx);
            let mut state = repo.load()?;
            let value = op(&mut state);
            repo.save(&state)?;
            value
        };
        tx.commit()?;
        Ok(value)
    }

    pub(crate) async fn set_trigger(&self, trigger: Option<SyncTrigger>) {
        *self.trigger.lock().await = trigger;
    }

    async fn notify(&self, source: TriggerSource) -> bool {
        self.trigger
            .lock()
            .await
            .as_ref()
            .is_some_and(|trigger| trigger.fire(source))
    }

    /// Create a group or note; returns its local id.
    pub async fn create_entity(&self, fields: EntityFields) -> Result<LocalId> {
        let now = now_millis();
        let entity = self
            .write(|tx| mutations::create(tx, &fields, now))
            .await?;
        tracing::debug!(local_id = %entity.local_id, table = %entity.table(), "Created entity");
        self.notify(TriggerSource::Mutation).await;
        Ok(entity.local_id)
    }

    /// Create a group; `color` defaults to a neutral grey.
    pub async fn create_group(&self, name: &str, color: Option<&str>) -> Result<LocalId> {
        self.create_entity(EntityFields::Group(GroupFields {
            name: name.trim().to_string(),
            color: color
                .map_or(DEFAULT_GROUP_COLOR, str::trim)
                .to_ascii_lowercase(),
        }))
        .await
    }

    pub async fn create_note(
        &self,
        group_id: LocalId,
        title: &str,
        content: &str,
    ) -> Result<LocalId> {
        self.create_entity(EntityFields::Note(NoteFields {
            title: title.trim().to_string(),
            content: content.to_string(),
            group_id,
        }))
        .await
    }

    /// Apply a partial update; `false` when the values were already current.
    pub async fn update_entity(&self, local_id: LocalId, changes: &EntityChanges) -> Result<bool> {
        let now = now_millis();
        let updated = self
            .write(|tx| mutations::update(tx, local_id, changes, now))
            .await?;
        if updated.is_some() {
            self.notify(TriggerSource::Mutation).await;
        }
        Ok(updated.is_some())
    }

    /// Soft-delete a live entity.
    pub async fn soft_delete_entity(&self, local_id: LocalId) -> Result<()> {
        let now = now_millis();
        self.write(|tx| mutations::soft_delete(tx, local_id, now))
            .await?;
        self.notify(TriggerSource::Mutation).await;
        Ok(())
    }

    /// Fetch an entity, soft-deleted rows included.
    pub async fn get_entity(&self, local_id: LocalId) -> Result<Option<Entity>> {
        self.read(|conn| EntityRepository::new(conn).get(local_id))
            .await
    }

    pub async fn list(&self, table: EntityTable, include_deleted: bool) -> Result<Vec<Entity>> {
        self.read(|conn| EntityRepository::new(conn).list(table, include_deleted))
            .await
    }

    /// Reactive view of a table's live rows, most recently updated first.
    pub fn query_all(&self, table: EntityTable) -> watch::Receiver<Vec<Entity>> {
        self.views.sender(table).subscribe()
    }

    /// Ask an attached engine for a cycle now; `false` without one.
    pub async fn trigger_immediate_sync(&self) -> bool {
        self.notify(TriggerSource::Manual).await
    }

    /// History of an entity, newest first.
    pub async fn list_history(&self, local_id: LocalId) -> Result<Vec<HistoryEntry>> {
        self.read(|conn| {
            if EntityRepository::new(conn).table_of(local_id)?.is_none() {
                return Err(Error::NotFound(format!("entity {local_id}")));
            }
            HistoryRepository::new(conn).list(local_id)
        })
        .await
    }

    /// Roll an entity back to one of its history entries.
    pub async fn restore(&self, local_id: LocalId, entry_id: i64) -> Result<RestoreResult> {
        let now = now_millis();
        let result = self
            .write(|tx| mutations::restore(tx, local_id, entry_id, now))
            .await?;
        if result.applied {
            tracing::info!(local_id = %local_id, entry_id, version = result.version, "Restored entity");
            self.notify(TriggerSource::Mutation).await;
        }
        Ok(result)
    }

    /// Queue entries not yet acknowledged by the remote, oldest first.
    pub async fn pending_mutations(&self) -> Result<Vec<QueueEntry>> {
        self.read(|conn| QueueRepository::new(conn).drain()).await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.read(|conn| QueueRepository::new(conn).count()).await
    }

    /// Entries the remote rejected, newest first.
    pub async fn list_sync_failures(&self, limit: usize) -> Result<Vec<SyncFailure>> {
        self.read(|conn| SyncStateRepository::new(conn).list_failures(limit))
            .await
    }

    pub async fn sync_state(&self) -> Result<SyncState> {
        self.read(|conn| SyncStateRepository::new(conn).load())
            .await
    }
}
