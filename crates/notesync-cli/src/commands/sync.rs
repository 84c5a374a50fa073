use std::path::Path;
use std::sync::Arc;

use notesync_core::models::SyncCursor;
use notesync_core::{
    ConfigError, HttpRemoteClient, RemoteConfig, Session, SyncConfig, SyncEngine, SyncPhase,
    SyncState,
};
use serde::Serialize;

use crate::commands::common::{
    format_sync_failure_lines, format_sync_timestamp, open_store, sync_failure_to_item,
    SyncFailureItem,
};
use crate::error::CliError;

/// Everything a one-shot sync needs from the environment.
#[derive(Debug)]
pub struct SyncSettings {
    pub remote: RemoteConfig,
    pub session: Session,
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize)]
pub struct SyncStateItem {
    pub owner_id: Option<String>,
    pub pending_mutations: usize,
    pub groups_cursor: Option<SyncCursor>,
    pub notes_cursor: Option<SyncCursor>,
    pub backoff_attempts: u32,
    pub last_error: Option<String>,
    pub last_error_at_iso: Option<String>,
    pub last_success_at_iso: Option<String>,
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, CliError> {
        Self::from_parts(
            RemoteConfig::from_env(),
            Session::from_env(),
            SyncConfig::from_env(),
        )
    }

    /// A missing variable becomes a "not configured" error; the first failure wins.
    pub(crate) fn from_parts(
        remote: Result<RemoteConfig, ConfigError>,
        session: Result<Session, ConfigError>,
        sync: Result<SyncConfig, ConfigError>,
    ) -> Result<Self, CliError> {
        let not_configured = |error: ConfigError| match error {
            ConfigError::MissingVar(name) => CliError::SyncNotConfigured(name),
            other => CliError::Config(other),
        };

        Ok(Self {
            remote: remote.map_err(not_configured)?,
            session: session.map_err(not_configured)?,
            // One cycle per invocation; no periodic timer.
            sync: sync?.without_periodic_sync(),
        })
    }
}

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let settings = SyncSettings::from_env()?;

    let store = open_store(db_path).await?;
    let remote = Arc::new(HttpRemoteClient::new(&settings.remote)?);
    let mut engine = SyncEngine::new(store, remote, settings.sync);

    engine.start(settings.session).await?;
    let outcome = engine.sync_now().await;
    engine.stop().await;
    let status = outcome?;

    if status.phase == SyncPhase::BackingOff {
        return Err(CliError::SyncFailed(
            status
                .last_error
                .unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let report = status.last_cycle.unwrap_or_default();
    println!(
        "Sync completed: pushed {}, pulled {}, applied {}",
        report.pushed, report.pulled, report.applied
    );
    if report.rejected > 0 {
        println!(
            "{} change(s) rejected by the remote; see `notesync sync failures`",
            report.rejected
        );
    }
    if status.pending_mutations > 0 {
        println!("{} change(s) still waiting to sync", status.pending_mutations);
    }
    Ok(())
}

pub fn sync_state_to_item(state: &SyncState, pending_mutations: usize) -> SyncStateItem {
    SyncStateItem {
        owner_id: state.owner_id.clone(),
        pending_mutations,
        groups_cursor: state.groups_cursor,
        notes_cursor: state.notes_cursor,
        backoff_attempts: state.backoff_attempts,
        last_error: state.last_error.clone(),
        last_error_at_iso: state.last_error_at.map(format_sync_timestamp),
        last_success_at_iso: state.last_success_at.map(format_sync_timestamp),
    }
}

pub fn format_sync_state_lines(item: &SyncStateItem) -> Vec<String> {
    let mut lines = vec![
        format!("owner:    {}", item.owner_id.as_deref().unwrap_or("(none)")),
        format!("pending:  {}", item.pending_mutations),
        format!(
            "last ok:  {}",
            item.last_success_at_iso.as_deref().unwrap_or("never")
        ),
    ];
    if item.backoff_attempts > 0 {
        lines.push(format!("failures: {} in a row", item.backoff_attempts));
    }
    if let Some(error) = &item.last_error {
        lines.push(format!(
            "error:    {error} ({})",
            item.last_error_at_iso.as_deref().unwrap_or("unknown time")
        ));
    }
    lines
}

pub async fn run_sync_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let state = store.sync_state().await?;
    let item = sync_state_to_item(&state, store.pending_count().await?);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    for line in format_sync_state_lines(&item) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_failures(
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let failures = store.list_sync_failures(limit).await?;

    if as_json {
        let json_items = failures
            .iter()
            .map(sync_failure_to_item)
            .collect::<Vec<SyncFailureItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if failures.is_empty() {
        println!("No rejected changes recorded.");
        return Ok(());
    }

    for line in format_sync_failure_lines(&failures) {
        println!("{line}");
    }
    Ok(())
}
