//! Single-worker sync engine.
//!
//! One spawned task owns the state machine and reads triggers from a channel
//! with a single slot, so at most one cycle runs at a time and bursts of
//! triggers collapse into one pending request.

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::backoff::Backoff;
use super::cycle::{self, CycleContext};
use crate::config::SyncConfig;
use crate::db::QueueRepository;
use crate::error::{Error, Result};
use crate::remote::{RemoteClient, Session};
use crate::services::LocalStore;
use crate::state::{CycleReport, SyncPhase, SyncStatus};
use crate::util::now_millis;

/// Why a cycle was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Engine just started
    Start,
    /// A local mutation was committed
    Mutation,
    /// App returned to foreground or connectivity came back
    Reconnect,
    Periodic,
    /// Explicit user request
    Manual,
    /// Backoff timer expired
    Retry,
}

impl TriggerSource {
    /// User-driven triggers skip the rest of a backoff wait.
    pub const fn interrupts_backoff(self) -> bool {
        matches!(self, Self::Manual | Self::Reconnect)
    }
}

/// Cheap handle for requesting a cycle.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<TriggerSource>,
}

impl SyncTrigger {
    pub(crate) const fn new(tx: mpsc::Sender<TriggerSource>) -> Self {
        Self { tx }
    }

    /// Request a cycle; `false` when it folded into an already pending one
    /// or the engine is gone.
    pub fn fire(&self, source: TriggerSource) -> bool {
        match self.tx.try_send(source) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(?source, "Sync already pending; trigger coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

struct Running {
    trigger: SyncTrigger,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the background worker and its observable status.
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteClient>,
    config: SyncConfig,
    status: Arc<watch::Sender<SyncStatus>>,
    running: Option<Running>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteClient>, config: SyncConfig) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            store,
            remote,
            config,
            status: Arc::new(status),
            running: None,
        }
    }

    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Passive view of the engine state.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn status_snapshot(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Start the worker for `session`; a running worker is stopped first.
    ///
    /// Switching owners discards the pull cursors so the new owner's rows are
    /// fetched from the beginning.
    pub async fn start(&mut self, session: Session) -> Result<()> {
        if !session.is_complete() {
            return Err(Error::InvalidInput(
                "session needs an owner id and an access token".to_string(),
            ));
        }
        self.stop().await;

        let owner_id = session.owner_id.clone();
        let released = self
            .store
            .write(|tx| QueueRepository::new(tx).clear_in_flight())
            .await?;
        if released > 0 {
            tracing::debug!(released, "Released stale queue claims");
        }
        let state = self
            .store
            .update_sync_state(|state| {
                if state.owner_id.as_deref() != Some(owner_id.as_str()) {
                    if let Some(previous) = &state.owner_id {
                        tracing::info!(
                            previous = %previous,
                            owner_id = %owner_id,
                            "Owner changed; resetting pull cursors"
                        );
                    }
                    state.owner_id = Some(owner_id.clone());
                    state.groups_cursor = None;
                    state.notes_cursor = None;
                }
                state.clone()
            })
            .await?;
        let pending_mutations = self.store.pending_count().await?;

        let backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max)
            .with_attempts(state.backoff_attempts);
        let retry_at = (backoff.attempts() > 0).then(|| Instant::now() + backoff.current_delay());
        let retry_at_ms = retry_at.map(|_| now_millis() + duration_millis(backoff.current_delay()));

        self.status.send_modify(|status| {
            status.phase = if retry_at.is_some() {
                SyncPhase::BackingOff
            } else {
                SyncPhase::Idle
            };
            status.backoff_attempts = state.backoff_attempts;
            status.retry_at = retry_at_ms;
            status.last_error.clone_from(&state.last_error);
            status.last_error_at = state.last_error_at;
            status.last_success_at = state.last_success_at;
            status.pending_mutations = pending_mutations;
        });

        let (tx, rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let trigger = SyncTrigger::new(tx);
        self.store.set_trigger(Some(trigger.clone())).await;

        let worker = Worker {
            store: self.store.clone(),
            remote: Arc::clone(&self.remote),
            session,
            config: self.config.clone(),
            status: Arc::clone(&self.status),
            backoff,
        };
        let handle = tokio::spawn(worker.run(rx, shutdown_rx, retry_at));
        trigger.fire(TriggerSource::Start);

        tracing::info!(owner_id = %owner_id, pending_mutations, "Sync engine started");
        self.running = Some(Running {
            trigger,
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Stop the worker, letting an in-flight cycle finish first.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.store.set_trigger(None).await;
        let _ = running.shutdown.send(());
        if let Err(error) = running.handle.await {
            tracing::warn!("Sync worker ended abnormally: {error}");
        }
        self.status.send_modify(|status| {
            status.phase = SyncPhase::Stopped;
            status.retry_at = None;
        });
        tracing::info!("Sync engine stopped");
    }

    /// Request a cycle without waiting for it.
    pub fn trigger(&self, source: TriggerSource) -> Result<bool> {
        let running = self.running.as_ref().ok_or(Error::EngineNotRunning)?;
        Ok(running.trigger.fire(source))
    }

    /// Request a cycle and wait until one that started after this call finishes.
    pub async fn sync_now(&self) -> Result<SyncStatus> {
        let mut status = self.status();
        let started = status.borrow_and_update().cycles_started;
        self.trigger(TriggerSource::Manual)?;

        let finished = status
            .wait_for(|status| status.cycles_finished > started)
            .await
            .map_err(|_| Error::EngineNotRunning)?
            .clone();
        Ok(finished)
    }
}

struct Worker {
    store: LocalStore,
    remote: Arc<dyn RemoteClient>,
    session: Session,
    config: SyncConfig,
    status: Arc<watch::Sender<SyncStatus>>,
    backoff: Backoff,
}

impl Worker {
    async fn run(
        mut self,
        mut triggers: mpsc::Receiver<TriggerSource>,
        mut shutdown: oneshot::Receiver<()>,
        mut retry_at: Option<Instant>,
    ) {
        let mut periodic = self.config.periodic_interval.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            let source = tokio::select! {
                _ = &mut shutdown => break,
                received = triggers.recv() => match received {
                    Some(source) if retry_at.is_some() && !source.interrupts_backoff() => {
                        tracing::debug!(?source, "Backing off; trigger deferred to retry");
                        continue;
                    }
                    Some(source) => source,
                    None => break,
                },
                () = tick(periodic.as_mut()), if retry_at.is_none() => TriggerSource::Periodic,
                () = sleep_until(retry_at) => TriggerSource::Retry,
            };
            retry_at = self.run_cycle(source).await;
        }

        tracing::debug!("Sync worker exiting");
    }

    /// Run one push/pull cycle; returns the retry deadline when it failed.
    async fn run_cycle(&mut self, source: TriggerSource) -> Option<Instant> {
        tracing::debug!(?source, "Sync cycle starting");
        self.status.send_modify(|status| {
            status.cycles_started += 1;
            status.phase = SyncPhase::Pushing;
            status.retry_at = None;
        });

        let mut report = CycleReport::default();
        let ctx = CycleContext {
            store: &self.store,
            remote: self.remote.as_ref(),
            session: &self.session,
            page_size: self.config.pull_page_size,
            status: self.status.as_ref(),
        };
        let result = async {
            cycle::push(&ctx, &mut report).await?;
            self.status
                .send_modify(|status| status.phase = SyncPhase::Pulling);
            cycle::pull(&ctx, &mut report).await?;
            // Local winners were queued during the pull; send them before going idle.
            if report.local_wins > 0 {
                self.status
                    .send_modify(|status| status.phase = SyncPhase::Pushing);
                cycle::push(&ctx, &mut report).await?;
            }
            Ok::<_, Error>(())
        }
        .await;

        let pending_mutations = match self.store.pending_count().await {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!("Failed to count pending mutations: {error}");
                self.status.borrow().pending_mutations
            }
        };
        let now = now_millis();

        match result {
            Ok(()) => {
                self.backoff.reset();
                if let Err(error) = self
                    .store
                    .update_sync_state(|state| {
                        state.backoff_attempts = 0;
                        state.last_success_at = Some(now);
                    })
                    .await
                {
                    tracing::warn!("Failed to persist sync success: {error}");
                }
                tracing::info!(
                    pushed = report.pushed,
                    rejected = report.rejected,
                    pulled = report.pulled,
                    applied = report.applied,
                    local_wins = report.local_wins,
                    "Sync cycle finished"
                );
                self.status.send_modify(|status| {
                    status.phase = SyncPhase::Idle;
                    status.cycles_finished += 1;
                    status.backoff_attempts = 0;
                    status.last_success_at = Some(now);
                    status.pending_mutations = pending_mutations;
                    status.last_cycle = Some(report);
                });
                None
            }
            Err(error) => {
                let delay = self.backoff.fail();
                let attempts = self.backoff.attempts();
                let message = error.to_string();
                if error.is_retryable() {
                    tracing::warn!(attempts, ?delay, "Sync cycle failed: {message}");
                } else {
                    tracing::error!(attempts, ?delay, "Sync cycle failed: {message}");
                }
                if let Err(persist_error) = self
                    .store
                    .update_sync_state(|state| {
                        state.backoff_attempts = attempts;
                        state.last_error = Some(message.clone());
                        state.last_error_at = Some(now);
                    })
                    .await
                {
                    tracing::warn!("Failed to persist sync failure: {persist_error}");
                }
                self.status.send_modify(|status| {
                    status.phase = SyncPhase::BackingOff;
                    status.cycles_finished += 1;
                    status.backoff_attempts = attempts;
                    status.retry_at = Some(now + duration_millis(delay));
                    status.last_error = Some(message);
                    status.last_error_at = Some(now);
                    status.pending_mutations = pending_mutations;
                    status.last_cycle = Some(report);
                });
                Some(Instant::now() + delay)
            }
        }
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

fn duration_millis(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
