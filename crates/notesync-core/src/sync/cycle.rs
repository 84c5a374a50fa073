//! One sync cycle: push the mutation queue, then pull remote changes.
//!
//! Local writes happen in short transactions between remote calls; no
//! transaction is ever held open across the network.

use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::watch;

use super::resolver::{resolve, Resolution};
use crate::db::{EntityRepository, HistoryRepository, QueueRepository, SyncStateRepository};
use crate::error::{Error, Result};
use crate::models::{
    Entity, EntityFields, EntityTable, GroupFields, HistoryOp, NoteFields, Operation, Payload,
    QueueEntry, DEFAULT_GROUP_COLOR,
};
use crate::remote::{RemoteClient, RemoteError, RemoteRecord, Session};
use crate::services::{mutations, LocalStore};
use crate::state::{CycleReport, SyncStatus};
use crate::util::now_millis;

/// Borrowed collaborators for one cycle.
pub(crate) struct CycleContext<'a> {
    pub store: &'a LocalStore,
    pub remote: &'a dyn RemoteClient,
    pub session: &'a Session,
    pub page_size: usize,
    pub status: &'a watch::Sender<SyncStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PushAction {
    Insert(Payload),
    Update(String, Payload),
    Delete(String),
}

/// A claimed queue entry; `action` is `Err` when it can never be pushed.
struct PushJob {
    entry: QueueEntry,
    action: std::result::Result<PushAction, String>,
}

/// Drain the queue in FIFO order.
///
/// A transient failure releases the claim and aborts; a rejection drops the
/// entry, records it, and moves on.
pub(crate) async fn push(ctx: &CycleContext<'_>, report: &mut CycleReport) -> Result<()> {
    while let Some(job) = ctx.store.write(|tx| claim_next(tx)).await? {
        let entry = job.entry;
        let action = match job.action {
            Ok(action) => action,
            Err(reason) => {
                reject(ctx, &entry, &reason).await?;
                report.rejected += 1;
                continue;
            }
        };

        match send(ctx, entry.table, &action).await {
            Ok(record) => {
                ctx.store
                    .write(|tx| acknowledge(tx, &entry, &action, &record))
                    .await?;
                tracing::debug!(
                    entry_id = entry.id,
                    operation = %entry.operation,
                    table = %entry.table,
                    remote_id = %record.id,
                    "Pushed queue entry"
                );
                report.pushed += 1;
            }
            Err(RemoteError::Rejected(message)) => {
                reject(ctx, &entry, &message).await?;
                report.rejected += 1;
            }
            Err(error @ RemoteError::Transient(_)) => {
                ctx.store
                    .write(|tx| QueueRepository::new(tx).set_in_flight(entry.id, false))
                    .await?;
                return Err(error.into());
            }
        }
    }
    Ok(())
}

fn claim_next(conn: &Connection) -> Result<Option<PushJob>> {
    let queue = QueueRepository::new(conn);
    let Some(entry) = queue.next()? else {
        return Ok(None);
    };
    queue.set_in_flight(entry.id, true)?;

    let entities = EntityRepository::new(conn);
    let remote_id = entities.remote_id_of(entry.local_id)?;
    let action = match (entry.operation, remote_id) {
        (Operation::Create, None) => remote_payload(&entities, &entry.payload)?.map(PushAction::Insert),
        (Operation::Create | Operation::Update, Some(remote_id)) => {
            remote_payload(&entities, &entry.payload)?
                .map(|payload| PushAction::Update(remote_id, payload))
        }
        (Operation::Delete, Some(remote_id)) => Ok(PushAction::Delete(remote_id)),
        (Operation::Update | Operation::Delete, None) => Err(format!(
            "{} {} was never created remotely",
            entry.table, entry.local_id
        )),
    };
    Ok(Some(PushJob { entry, action }))
}

/// Swap local references for remote ids; `Err` names a reference the remote can't know.
fn remote_payload(
    entities: &EntityRepository<'_>,
    payload: &Payload,
) -> Result<std::result::Result<Payload, String>> {
    let mut remote = payload.clone();
    if let Some(group_id) = payload.get("group_id") {
        let Some(local_group) = group_id.as_i64().map(crate::models::LocalId::new) else {
            return Ok(Err(format!("group reference {group_id} is not a local id")));
        };
        match entities.remote_id_of(local_group)? {
            Some(remote_group) => {
                remote.insert("group_id".to_string(), Value::String(remote_group));
            }
            None => return Ok(Err(format!("group {local_group} has not been synced"))),
        }
    }
    Ok(Ok(remote))
}

async fn send(
    ctx: &CycleContext<'_>,
    table: EntityTable,
    action: &PushAction,
) -> std::result::Result<RemoteRecord, RemoteError> {
    match action {
        PushAction::Insert(payload) => ctx.remote.insert(ctx.session, table, payload).await,
        PushAction::Update(remote_id, payload) => {
            ctx.remote
                .update_by_id(ctx.session, table, remote_id, payload)
                .await
        }
        PushAction::Delete(remote_id) => ctx.remote.mark_deleted(ctx.session, table, remote_id).await,
    }
}

fn acknowledge(
    conn: &Connection,
    entry: &QueueEntry,
    action: &PushAction,
    record: &RemoteRecord,
) -> Result<()> {
    QueueRepository::new(conn).acknowledge(entry.id)?;
    let entities = EntityRepository::new(conn);
    if matches!(action, PushAction::Insert(_)) {
        entities.set_remote_id(entry.local_id, &record.id)?;
    }
    entities.raise_version(entry.local_id, record.version)
}

async fn reject(ctx: &CycleContext<'_>, entry: &QueueEntry, message: &str) -> Result<()> {
    tracing::warn!(
        entry_id = entry.id,
        operation = %entry.operation,
        table = %entry.table,
        local_id = %entry.local_id,
        "Remote rejected queue entry: {message}"
    );
    let now = now_millis();
    let failure = ctx
        .store
        .write(|tx| {
            QueueRepository::new(tx).acknowledge(entry.id)?;
            SyncStateRepository::new(tx).record_failure(
                entry.table,
                entry.local_id,
                entry.operation,
                message,
                now,
            )
        })
        .await?;
    ctx.status.send_modify(|status| status.push_failure(failure));
    Ok(())
}

/// What applying one pulled record did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Inserted,
    Overwritten,
    Unchanged,
    Skipped,
    LocalWon,
}

/// Pull every table from its cursor, groups first so note references resolve.
pub(crate) async fn pull(ctx: &CycleContext<'_>, report: &mut CycleReport) -> Result<()> {
    let state = ctx.store.sync_state().await?;
    for table in EntityTable::ALL {
        let mut cursor = state.cursor(table);
        loop {
            let records = ctx
                .remote
                .list_since(ctx.session, table, cursor, ctx.page_size)
                .await?;
            let Some(last) = records.iter().map(RemoteRecord::cursor).max() else {
                break;
            };

            let now = now_millis();
            let outcomes = ctx
                .store
                .write(|tx| {
                    let mut outcomes = Vec::with_capacity(records.len());
                    for record in &records {
                        match apply_remote(tx, table, record, now) {
                            Ok(applied) => outcomes.push(applied),
                            Err(Error::ConflictApply { remote_id, reason }) => {
                                tracing::warn!(
                                    table = %table,
                                    remote_id = %remote_id,
                                    "Skipping remote record: {reason}"
                                );
                                outcomes.push(Applied::Skipped);
                            }
                            Err(error) => return Err(error),
                        }
                    }
                    SyncStateRepository::new(tx).save_cursor(table, last)?;
                    Ok(outcomes)
                })
                .await?;

            report.pulled += records.len();
            for applied in outcomes {
                match applied {
                    Applied::Inserted | Applied::Overwritten => report.applied += 1,
                    Applied::Skipped => report.skipped += 1,
                    Applied::LocalWon => report.local_wins += 1,
                    Applied::Unchanged => {}
                }
            }

            cursor = Some(last);
            if records.len() < ctx.page_size {
                break;
            }
        }
    }
    Ok(())
}

/// Resolve one remote record against the current local row.
fn apply_remote(
    conn: &Connection,
    table: EntityTable,
    record: &RemoteRecord,
    now: i64,
) -> Result<Applied> {
    let entities = EntityRepository::new(conn);
    let local_id = entities.local_id_for_remote(table, &record.id)?;
    if local_id.is_none() && record.is_deleted {
        return Ok(Applied::Skipped);
    }

    let fields = decode_fields(&entities, table, record)?;
    let updated_at = record.updated_at.timestamp_millis();

    let Some(local_id) = local_id else {
        let entity = entities.insert(
            &fields,
            Some(&record.id),
            record.version,
            record.created_at.timestamp_millis(),
            updated_at,
            false,
        )?;
        HistoryRepository::new(conn).record(&entity, HistoryOp::Create, now)?;
        return Ok(Applied::Inserted);
    };

    let local = entities
        .get(local_id)?
        .ok_or_else(|| Error::NotFound(format!("entity {local_id}")))?;
    let incoming = Entity {
        local_id,
        remote_id: Some(record.id.clone()),
        version: record.version,
        created_at: local.created_at,
        updated_at,
        is_deleted: record.is_deleted,
        fields,
    };

    match resolve(&local, &incoming) {
        Resolution::Unchanged => Ok(Applied::Unchanged),
        Resolution::RemoteWins { loser } => {
            if let Some((op, snapshot)) = loser {
                HistoryRepository::new(conn).record_snapshot(local_id, table, op, &snapshot, now)?;
            }
            entities.write(&incoming)?;
            Ok(Applied::Overwritten)
        }
        Resolution::LocalWins { push_version } => {
            let winner = Entity {
                version: push_version,
                ..local
            };
            entities.write(&winner)?;
            mutations::enqueue_repush(conn, &winner, now)?;
            tracing::debug!(local_id = %local_id, version = push_version, "Local state won conflict");
            Ok(Applied::LocalWon)
        }
    }
}

fn decode_fields(
    entities: &EntityRepository<'_>,
    table: EntityTable,
    record: &RemoteRecord,
) -> Result<EntityFields> {
    let conflict = |reason: String| Error::ConflictApply {
        remote_id: record.id.clone(),
        reason,
    };
    let text = |name: &str| record.str_field(name).map(ToString::to_string);

    match table {
        EntityTable::Groups => Ok(EntityFields::Group(GroupFields {
            name: text("name").ok_or_else(|| conflict("missing name".to_string()))?,
            color: text("color").unwrap_or_else(|| DEFAULT_GROUP_COLOR.to_string()),
        })),
        EntityTable::Notes => {
            let group_remote_id = record
                .str_field("group_id")
                .ok_or_else(|| conflict("missing group_id".to_string()))?;
            let group_id = entities
                .local_id_for_remote(EntityTable::Groups, group_remote_id)?
                .ok_or_else(|| conflict(format!("unknown group {group_remote_id}")))?;
            Ok(EntityFields::Note(NoteFields {
                title: text("title").unwrap_or_default(),
                content: text("content").unwrap_or_default(),
                group_id,
            }))
        }
    }
}
