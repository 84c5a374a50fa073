use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use notesync_core::{
    Entity, EntityFields, EntityTable, HistoryEntry, LocalId, LocalStore, QueueEntry, SyncFailure,
};
use serde::Serialize;

use crate::cli::TableArg;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct EntityListItem {
    pub id: i64,
    pub remote_id: Option<String>,
    pub table: EntityTable,
    pub label: String,
    pub version: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub is_deleted: bool,
    #[serde(flatten)]
    pub fields: EntityFields,
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub operation: String,
    pub table: EntityTable,
    pub local_id: i64,
    pub fields: Vec<String>,
    pub created_at_iso: String,
    pub in_flight: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncFailureItem {
    pub id: i64,
    pub table: EntityTable,
    pub local_id: i64,
    pub operation: String,
    pub message: String,
    pub recorded_at: i64,
    pub recorded_at_iso: String,
}

impl From<TableArg> for EntityTable {
    fn from(table: TableArg) -> Self {
        match table {
            TableArg::Notes => Self::Notes,
            TableArg::Groups => Self::Groups,
        }
    }
}

pub async fn list_entities(
    table: EntityTable,
    include_deleted: bool,
    db_path: &Path,
) -> Result<Vec<Entity>, CliError> {
    let store = open_store(db_path).await?;
    let mut entities = store.list(table, include_deleted).await?;
    entities.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(entities)
}

pub async fn resolve_entity(id: &str, store: &LocalStore) -> Result<Entity, CliError> {
    let local_id = parse_local_id(id)?;
    store
        .get_entity(local_id)
        .await?
        .ok_or_else(|| CliError::EntityNotFound(local_id.to_string()))
}

pub fn parse_local_id(id: &str) -> Result<LocalId, CliError> {
    let trimmed = id.trim();
    trimmed
        .parse::<LocalId>()
        .ok()
        .filter(|local_id| local_id.get() > 0)
        .ok_or_else(|| CliError::InvalidId(trimmed.to_string()))
}

pub fn format_entity_lines(entities: &[Entity]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    entities
        .iter()
        .map(|entity| {
            let preview = entity_preview(entity, 40);
            let relative_time = format_relative_time(entity.updated_at, now_ms);
            let marker = sync_marker(entity);

            format!(
                "{:<6}  {preview:<40}  v{:<4}  {relative_time:<10}  {marker}",
                entity.local_id.get(),
                entity.version
            )
        })
        .collect()
}

pub fn entity_to_list_item(entity: &Entity) -> EntityListItem {
    let now_ms = Utc::now().timestamp_millis();
    EntityListItem {
        id: entity.local_id.get(),
        remote_id: entity.remote_id.clone(),
        table: entity.table(),
        label: entity_preview(entity, 80),
        version: entity.version,
        updated_at: entity.updated_at,
        relative_time: format_relative_time(entity.updated_at, now_ms),
        is_deleted: entity.is_deleted,
        fields: entity.fields.clone(),
    }
}

fn sync_marker(entity: &Entity) -> String {
    let mut parts = vec![match &entity.fields {
        EntityFields::Note(note) => format!("group={}", note.group_id),
        EntityFields::Group(group) => group.color.clone(),
    }];
    if entity.remote_id.is_none() {
        parts.push("local-only".to_string());
    }
    if entity.is_deleted {
        parts.push("deleted".to_string());
    }
    parts.join(" ")
}

pub fn entity_preview(entity: &Entity, max_chars: usize) -> String {
    let collapsed = entity.label().split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_history_lines(entries: &[HistoryEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let label = match &entry.snapshot.fields {
                EntityFields::Note(note) => note.title.clone(),
                EntityFields::Group(group) => group.name.clone(),
            };
            let deleted = if entry.snapshot.is_deleted {
                "  (deleted)"
            } else {
                ""
            };
            format!(
                "{:<6}  {}  {:<7}  {label}{deleted}",
                entry.id,
                format_sync_timestamp(entry.recorded_at),
                entry.op.as_str()
            )
        })
        .collect()
}

pub fn queue_entry_to_item(entry: &QueueEntry) -> QueueItem {
    let mut fields = entry.payload.keys().cloned().collect::<Vec<_>>();
    fields.sort();
    QueueItem {
        id: entry.id,
        operation: entry.operation.as_str().to_string(),
        table: entry.table,
        local_id: entry.local_id.get(),
        fields,
        created_at_iso: format_sync_timestamp(entry.created_at),
        in_flight: entry.in_flight,
    }
}

pub fn format_queue_lines(entries: &[QueueEntry]) -> Vec<String> {
    entries
        .iter()
        .map(queue_entry_to_item)
        .map(|item| {
            format!(
                "{:<6}  {:<6}  {}/{}  [{}]",
                item.id,
                item.operation,
                item.table,
                item.local_id,
                item.fields.join(", ")
            )
        })
        .collect()
}

pub fn sync_failure_to_item(failure: &SyncFailure) -> SyncFailureItem {
    SyncFailureItem {
        id: failure.id,
        table: failure.table,
        local_id: failure.local_id.get(),
        operation: failure.operation.as_str().to_string(),
        message: failure.message.clone(),
        recorded_at: failure.recorded_at,
        recorded_at_iso: format_sync_timestamp(failure.recorded_at),
    }
}

pub fn format_sync_failure_lines(failures: &[SyncFailure]) -> Vec<String> {
    failures
        .iter()
        .map(|failure| {
            format!(
                "{}  {:<6}  {}/{}  {}",
                format_sync_timestamp(failure.recorded_at),
                failure.operation.as_str(),
                failure.table,
                failure.local_id,
                failure.message
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input_with_initial("")? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        return Err(CliError::EditorFailed("empty EDITOR command".into()));
    };

    let status = Command::new(program).args(parts).arg(file_path).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        )))
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("notesync-note-{}-{now}.md", std::process::id()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("NOTESYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("notesync")
        .join("notesync.db")
}

pub async fn open_store(path: &Path) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open_path(path.to_path_buf()).await?)
}
