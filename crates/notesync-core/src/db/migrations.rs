//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

fn apply(conn: &mut Connection, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.commit()?;
    Ok(())
}

/// Migration to version 1: entities, id mapping, queue, history, sync state
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // AUTOINCREMENT keeps local ids from ever being reused
        "CREATE TABLE IF NOT EXISTS id_map (
            local_id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_table TEXT NOT NULL CHECK (entity_table IN ('groups', 'notes')),
            remote_id TEXT,
            UNIQUE (entity_table, remote_id)
        )",
        "CREATE TABLE IF NOT EXISTS groups (
            local_id INTEGER PRIMARY KEY REFERENCES id_map(local_id),
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            version INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS notes (
            local_id INTEGER PRIMARY KEY REFERENCES id_map(local_id),
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            group_local_id INTEGER NOT NULL REFERENCES groups(local_id),
            version INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_notes_group ON notes(group_local_id)",
        "CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at DESC)",
        "CREATE TABLE IF NOT EXISTS mutation_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
            entity_table TEXT NOT NULL,
            local_id INTEGER NOT NULL REFERENCES id_map(local_id),
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            in_flight INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_mutation_queue_local ON mutation_queue(local_id)",
        "CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            local_id INTEGER NOT NULL REFERENCES id_map(local_id),
            entity_table TEXT NOT NULL,
            op TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            recorded_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_history_local ON history(local_id, id DESC)",
        "CREATE TABLE IF NOT EXISTS sync_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            owner_id TEXT,
            groups_cursor_at TEXT,
            groups_cursor_seq INTEGER,
            notes_cursor_at TEXT,
            notes_cursor_seq INTEGER,
            backoff_attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            last_error_at INTEGER,
            last_success_at INTEGER
        )",
        "INSERT OR IGNORE INTO sync_state (id) VALUES (1)",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements)?;
    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: persisted push rejections
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS sync_failures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_table TEXT NOT NULL,
            local_id INTEGER NOT NULL,
            operation TEXT NOT NULL,
            message TEXT NOT NULL,
            recorded_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_failures_recorded ON sync_failures(recorded_at DESC)",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    apply(conn, &statements)?;
    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
