//! In-process remote backend for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::watch;

use super::{RemoteClient, RemoteError, RemoteRecord, RemoteResult, Session};
use crate::models::{EntityTable, Payload, SyncCursor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    ListSince(EntityTable),
    Insert(EntityTable, Payload),
    Update(EntityTable, String, Payload),
    MarkDeleted(EntityTable, String),
}

#[derive(Default)]
struct ServerState {
    rows: HashMap<EntityTable, Vec<RemoteRecord>>,
    next_id: u64,
    next_seq: i64,
    clock: Option<DateTime<Utc>>,
    calls: Vec<RemoteCall>,
    /// Writes whose payload carries one of these `(field, value)` pairs are rejected
    rejections: Vec<(String, Value)>,
}

impl ServerState {
    fn tick(&mut self) -> (DateTime<Utc>, i64) {
        let now = self
            .clock
            .map_or_else(Utc::now, |clock| clock + Duration::milliseconds(1));
        self.clock = Some(now);
        self.next_seq += 1;
        (now, self.next_seq)
    }

    fn check_rejection(&self, fields: &Payload) -> RemoteResult<()> {
        for (key, value) in &self.rejections {
            if fields.get(key) == Some(value) {
                return Err(RemoteError::Rejected(format!("{key} is not allowed")));
            }
        }
        Ok(())
    }

    fn row_mut(
        &mut self,
        session: &Session,
        table: EntityTable,
        remote_id: &str,
    ) -> RemoteResult<&mut RemoteRecord> {
        self.rows
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|row| {
                row.id == remote_id && row.owner_id.as_deref() == Some(session.owner_id.as_str())
            })
            .ok_or_else(|| RemoteError::Rejected(format!("{table}/{remote_id}: no matching row")))
    }
}

/// Remote store kept in memory, with knobs for connectivity and failures.
pub struct MemoryRemote {
    state: Mutex<ServerState>,
    online: AtomicBool,
    gate: watch::Sender<bool>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(ServerState::default()),
            online: AtomicBool::new(true),
            gate,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Hold every call until [`Self::open_gate`].
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Run the server clock from `start` instead of wall time.
    pub fn set_clock(&self, start: DateTime<Utc>) {
        self.lock().clock = Some(start);
    }

    /// Advance the server clock and return the new instant, for rows stored with [`Self::put`].
    pub fn next_timestamp(&self) -> DateTime<Utc> {
        self.lock().tick().0
    }

    pub fn reject_field(&self, key: &str, value: Value) {
        self.lock().rejections.push((key.to_string(), value));
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&RemoteCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn insert_count(&self) -> usize {
        self.count_calls(|call| matches!(call, RemoteCall::Insert(..)))
    }

    pub fn write_count(&self) -> usize {
        self.count_calls(|call| !matches!(call, RemoteCall::ListSince(_)))
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: EntityTable) -> Vec<RemoteRecord> {
        self.lock().rows.get(&table).cloned().unwrap_or_default()
    }

    pub fn row(&self, table: EntityTable, remote_id: &str) -> Option<RemoteRecord> {
        self.rows(table).into_iter().find(|row| row.id == remote_id)
    }

    /// Store a row as-is, e.g. one written with a specific timestamp.
    pub fn put(&self, table: EntityTable, record: RemoteRecord) {
        let mut state = self.lock();
        state.next_seq = state.next_seq.max(record.seq);
        let rows = state.rows.entry(table).or_default();
        rows.retain(|row| row.id != record.id);
        rows.push(record);
    }

    /// Write from another device: merge fields, bump version and seq.
    pub fn server_update(&self, table: EntityTable, remote_id: &str, fields: &Payload) -> RemoteRecord {
        let mut state = self.lock();
        let (now, seq) = state.tick();
        let Some(row) = state
            .rows
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|row| row.id == remote_id)
        else {
            panic!("no remote row {table}/{remote_id}");
        };
        apply_write(row, fields, now, seq);
        row.clone()
    }

    /// Row created by another device.
    pub fn server_insert(&self, session: &Session, table: EntityTable, fields: &Payload) -> RemoteRecord {
        let mut state = self.lock();
        insert_row(&mut state, session, table, fields)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn enter(&self, call: RemoteCall) -> RemoteResult<CallGuard<'_>> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let guard = CallGuard { remote: self };
        tokio::task::yield_now().await;

        self.lock().calls.push(call);
        if self.online.load(Ordering::SeqCst) {
            Ok(guard)
        } else {
            Err(RemoteError::Transient("remote unreachable".to_string()))
        }
    }
}

struct CallGuard<'a> {
    remote: &'a MemoryRemote,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.remote.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn insert_row(
    state: &mut ServerState,
    session: &Session,
    table: EntityTable,
    fields: &Payload,
) -> RemoteRecord {
    let (now, seq) = state.tick();
    state.next_id += 1;
    let prefix = match table {
        EntityTable::Groups => "g",
        EntityTable::Notes => "n",
    };
    let record = RemoteRecord {
        id: format!("{prefix}-{}", 99 + state.next_id),
        owner_id: Some(session.owner_id.clone()),
        version: 1,
        seq,
        created_at: now,
        updated_at: now,
        is_deleted: false,
        fields: fields.clone(),
    };
    state.rows.entry(table).or_default().push(record.clone());
    record
}

fn apply_write(row: &mut RemoteRecord, fields: &Payload, now: DateTime<Utc>, seq: i64) {
    for (key, value) in fields {
        if key == "is_deleted" {
            row.is_deleted = value.as_bool().unwrap_or(row.is_deleted);
        } else {
            row.fields.insert(key.clone(), value.clone());
        }
    }
    row.version += 1;
    row.seq = seq;
    row.updated_at = now;
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn list_since(
        &self,
        session: &Session,
        table: EntityTable,
        cursor: Option<SyncCursor>,
        limit: usize,
    ) -> RemoteResult<Vec<RemoteRecord>> {
        let _guard = self.enter(RemoteCall::ListSince(table)).await?;
        let state = self.lock();
        let mut rows: Vec<RemoteRecord> = state
            .rows
            .get(&table)
            .into_iter()
            .flatten()
            .filter(|row| row.owner_id.as_deref() == Some(session.owner_id.as_str()))
            .filter(|row| cursor.map_or(true, |cursor| row.cursor() > cursor))
            .cloned()
            .collect();
        rows.sort_by_key(RemoteRecord::cursor);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert(
        &self,
        session: &Session,
        table: EntityTable,
        fields: &Payload,
    ) -> RemoteResult<RemoteRecord> {
        let _guard = self
            .enter(RemoteCall::Insert(table, fields.clone()))
            .await?;
        let mut state = self.lock();
        state.check_rejection(fields)?;
        Ok(insert_row(&mut state, session, table, fields))
    }

    async fn update_by_id(
        &self,
        session: &Session,
        table: EntityTable,
        remote_id: &str,
        fields: &Payload,
    ) -> RemoteResult<RemoteRecord> {
        let _guard = self
            .enter(RemoteCall::Update(table, remote_id.to_string(), fields.clone()))
            .await?;
        let mut state = self.lock();
        state.check_rejection(fields)?;
        let (now, seq) = state.tick();
        let row = state.row_mut(session, table, remote_id)?;
        apply_write(row, fields, now, seq);
        Ok(row.clone())
    }

    async fn mark_deleted(
        &self,
        session: &Session,
        table: EntityTable,
        remote_id: &str,
    ) -> RemoteResult<RemoteRecord> {
        let _guard = self
            .enter(RemoteCall::MarkDeleted(table, remote_id.to_string()))
            .await?;
        let mut state = self.lock();
        let (now, seq) = state.tick();
        let row = state.row_mut(session, table, remote_id)?;
        let mut fields = Payload::new();
        fields.insert("is_deleted".to_string(), Value::Bool(true));
        apply_write(row, &fields, now, seq);
        Ok(row.clone())
    }
}
