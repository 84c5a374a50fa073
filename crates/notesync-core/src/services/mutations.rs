//! Transaction-scoped write paths shared by the store and the sync engine.
//!
//! Every function here runs inside the caller's transaction so the entity row,
//! its history entries and its queue entries commit or roll back together.

use rusqlite::Connection;
use serde_json::Value;

use crate::db::{EntityRepository, HistoryRepository, QueueRepository};
use crate::error::{Error, Result};
use crate::models::{
    Entity, EntityChanges, EntityFields, EntityTable, HistoryOp, LocalId, Operation, Payload,
    RestoreResult,
};

/// Insert a new local entity at version 1 and queue its create.
pub(crate) fn create(conn: &Connection, fields: &EntityFields, now: i64) -> Result<Entity> {
    fields.validate()?;
    ensure_group_is_live(conn, fields)?;

    let entity = EntityRepository::new(conn).insert(fields, None, 1, now, now, false)?;
    HistoryRepository::new(conn).record(&entity, HistoryOp::Create, now)?;
    QueueRepository::new(conn).enqueue(
        Operation::Create,
        entity.table(),
        entity.local_id,
        &fields.to_payload(),
        now,
    )?;
    Ok(entity)
}

/// Apply a partial change; `None` when nothing actually changed.
pub(crate) fn update(
    conn: &Connection,
    local_id: LocalId,
    changes: &EntityChanges,
    now: i64,
) -> Result<Option<Entity>> {
    let current = EntityRepository::new(conn).get_live(local_id)?;
    let fields = current.fields.apply(changes)?;
    if fields == current.fields {
        return Ok(None);
    }
    fields.validate()?;
    if fields.group_ref() != current.fields.group_ref() {
        ensure_group_is_live(conn, &fields)?;
    }

    let next = Entity {
        fields,
        version: current.version + 1,
        updated_at: now.max(current.updated_at),
        ..current.clone()
    };
    EntityRepository::new(conn).write(&next)?;
    enqueue_change(conn, &current, &next, now)?;
    Ok(Some(next))
}

/// Soft-delete a live entity, keeping its pre-delete state in history.
pub(crate) fn soft_delete(conn: &Connection, local_id: LocalId, now: i64) -> Result<Entity> {
    let current = EntityRepository::new(conn).get_live(local_id)?;
    HistoryRepository::new(conn).record(&current, HistoryOp::Delete, now)?;

    let next = Entity {
        is_deleted: true,
        version: current.version + 1,
        updated_at: now.max(current.updated_at),
        ..current.clone()
    };
    EntityRepository::new(conn).write(&next)?;
    enqueue_change(conn, &current, &next, now)?;
    Ok(next)
}

/// Roll an entity back to a history snapshot; a no-op when it already matches.
pub(crate) fn restore(
    conn: &Connection,
    local_id: LocalId,
    entry_id: i64,
    now: i64,
) -> Result<RestoreResult> {
    let entry = HistoryRepository::new(conn)
        .get(entry_id)?
        .filter(|entry| entry.local_id == local_id)
        .ok_or_else(|| Error::NotFound(format!("history entry {entry_id} for entity {local_id}")))?;
    let entities = EntityRepository::new(conn);
    let current = entities
        .get(local_id)?
        .ok_or_else(|| Error::NotFound(format!("entity {local_id}")))?;

    if current.snapshot() == entry.snapshot {
        return Ok(RestoreResult {
            applied: false,
            version: current.version,
        });
    }
    if !entry.snapshot.is_deleted {
        ensure_group_is_live(conn, &entry.snapshot.fields)?;
    }

    HistoryRepository::new(conn).record(&current, HistoryOp::Restore, now)?;
    let next = Entity {
        fields: entry.snapshot.fields,
        is_deleted: entry.snapshot.is_deleted,
        version: current.version + 1,
        updated_at: now.max(current.updated_at),
        ..current.clone()
    };
    entities.write(&next)?;
    enqueue_change(conn, &current, &next, now)?;

    Ok(RestoreResult {
        applied: true,
        version: next.version,
    })
}

/// Queue whatever the remote needs to go from `before` to `after`.
///
/// Deletes of never-pushed entities collapse their pending create; updates of
/// entities the remote has never seen are queued as a full create.
pub(crate) fn enqueue_change(
    conn: &Connection,
    before: &Entity,
    after: &Entity,
    now: i64,
) -> Result<()> {
    let queue = QueueRepository::new(conn);
    let table = after.table();
    let local_id = after.local_id;

    if after.is_deleted && !before.is_deleted {
        return enqueue_delete(conn, after, now);
    }

    let mut changed = before.fields.diff(&after.fields);
    if before.is_deleted && !after.is_deleted {
        changed.insert("is_deleted".to_string(), Value::Bool(false));
    }
    if changed.is_empty() {
        return Ok(());
    }

    let known_remotely = after.remote_id.is_some() || queue.pending_create(local_id)?.is_some();
    if known_remotely {
        queue.enqueue(Operation::Update, table, local_id, &changed, now)?;
    } else if !after.is_deleted {
        queue.enqueue(
            Operation::Create,
            table,
            local_id,
            &after.fields.to_payload(),
            now,
        )?;
    }
    Ok(())
}

fn enqueue_delete(conn: &Connection, entity: &Entity, now: i64) -> Result<()> {
    let queue = QueueRepository::new(conn);

    if entity.remote_id.is_none() {
        match queue.pending_create(entity.local_id)? {
            Some(create) if !create.in_flight => {
                let dropped = queue.discard_for(entity.local_id)?;
                tracing::debug!(
                    local_id = %entity.local_id,
                    dropped,
                    "Collapsed create and delete of unsynced entity"
                );
                return Ok(());
            }
            // Create already on the wire: the delete follows it once acknowledged.
            Some(_) => {}
            None => return Ok(()),
        }
    }

    let mut payload = Payload::new();
    payload.insert("is_deleted".to_string(), Value::Bool(true));
    queue.enqueue(
        Operation::Delete,
        entity.table(),
        entity.local_id,
        &payload,
        now,
    )?;
    Ok(())
}

/// Full-state re-push after local state won a conflict.
pub(crate) fn enqueue_repush(conn: &Connection, entity: &Entity, now: i64) -> Result<()> {
    let queue = QueueRepository::new(conn);
    if entity.is_deleted {
        let mut payload = Payload::new();
        payload.insert("is_deleted".to_string(), Value::Bool(true));
        queue.enqueue(Operation::Delete, entity.table(), entity.local_id, &payload, now)?;
    } else {
        let mut payload = entity.fields.to_payload();
        payload.insert("is_deleted".to_string(), Value::Bool(false));
        queue.enqueue(Operation::Update, entity.table(), entity.local_id, &payload, now)?;
    }
    Ok(())
}

/// Notes must point at an existing, non-deleted group.
fn ensure_group_is_live(conn: &Connection, fields: &EntityFields) -> Result<()> {
    let Some(group_id) = fields.group_ref() else {
        return Ok(());
    };
    match EntityRepository::new(conn).get(group_id)? {
        Some(group) if group.table() == EntityTable::Groups && !group.is_deleted => Ok(()),
        Some(group) if group.table() == EntityTable::Groups => Err(Error::InvalidInput(format!(
            "group {group_id} is deleted"
        ))),
        _ => Err(Error::InvalidInput(format!("group {group_id} does not exist"))),
    }
}
