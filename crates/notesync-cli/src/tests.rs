use std::path::PathBuf;

use notesync_core::{
    Entity, EntityChanges, EntityFields, EntityTable, GroupFields, LocalId, LocalStore,
    NoteFields, RemoteConfig, Session, SyncConfig, SyncState,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::cli::EditArgs;
use crate::commands::common::{
    default_editor, entity_preview, entity_to_list_item, format_entity_lines,
    format_history_lines, format_queue_lines, format_relative_time, format_sync_timestamp,
    list_entities, normalize_content, parse_local_id, resolve_db_path, resolve_entity,
};
use crate::commands::edit::build_changes;
use crate::commands::sync::{
    format_sync_state_lines, sync_state_to_item, SyncSettings,
};
use crate::error::CliError;

fn note_entity(title: &str) -> Entity {
    Entity {
        local_id: LocalId::new(2),
        remote_id: None,
        version: 1,
        created_at: 0,
        updated_at: 0,
        is_deleted: false,
        fields: EntityFields::Note(NoteFields {
            title: title.to_string(),
            content: "body".to_string(),
            group_id: LocalId::new(1),
        }),
    }
}

fn group_entity() -> Entity {
    Entity {
        local_id: LocalId::new(1),
        remote_id: Some("g-100".to_string()),
        version: 3,
        created_at: 0,
        updated_at: 0,
        is_deleted: false,
        fields: EntityFields::Group(GroupFields {
            name: "Work".to_string(),
            color: "#3366ff".to_string(),
        }),
    }
}

fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |name| {
        pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| (*value).to_string())
    }
}

fn test_db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("nested").join("notesync.db")
}

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
}

#[test]
fn default_editor_is_defined() {
    assert!(!default_editor().is_empty());
}

#[test]
fn explicit_db_path_wins() {
    let path = PathBuf::from("/tmp/explicit.db");
    assert_eq!(resolve_db_path(Some(path.clone())), path);
}

#[test]
fn parse_local_id_rejects_garbage_and_non_positive_ids() {
    assert_eq!(parse_local_id(" 42 ").unwrap(), LocalId::new(42));
    assert!(matches!(parse_local_id("abc"), Err(CliError::InvalidId(_))));
    assert!(matches!(parse_local_id("0"), Err(CliError::InvalidId(_))));
    assert!(matches!(parse_local_id(""), Err(CliError::InvalidId(_))));
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
}

#[test]
fn format_sync_timestamp_returns_utc_label() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn entity_preview_truncates_with_ellipsis() {
    let note = note_entity("This is a very long sentence that should be shortened");
    assert_eq!(entity_preview(&note, 20), "This is a very lo...");
    assert_eq!(entity_preview(&group_entity(), 20), "Work");
}

#[test]
fn entity_lines_show_sync_markers() {
    let mut note = note_entity("Plan");
    note.is_deleted = true;
    let lines = format_entity_lines(&[group_entity(), note]);

    assert!(lines[0].starts_with("1 "));
    assert!(lines[0].contains("#3366ff"));
    assert!(!lines[0].contains("local-only"));
    assert!(lines[1].contains("group=1 local-only deleted"));
}

#[test]
fn list_item_json_flattens_fields() {
    let item = entity_to_list_item(&group_entity());
    let value = serde_json::to_value(&item).unwrap();

    assert_eq!(value["id"], 1);
    assert_eq!(value["table"], "groups");
    assert_eq!(value["kind"], "group");
    assert_eq!(value["name"], "Work");
    assert_eq!(value["remote_id"], "g-100");
}

#[test]
fn build_changes_maps_flags_to_entity_kind() {
    let note = note_entity("Plan");
    let args = EditArgs {
        id: "2".to_string(),
        title: Some("Ship".to_string()),
        group: Some("7".to_string()),
        ..EditArgs::default()
    };
    let Some(EntityChanges::Note(changes)) = build_changes(&note, &args).unwrap() else {
        panic!("expected note changes");
    };
    assert_eq!(changes.title.as_deref(), Some("Ship"));
    assert_eq!(changes.group_id, Some(LocalId::new(7)));
    assert_eq!(changes.content, None);

    let bare = EditArgs {
        id: "2".to_string(),
        ..EditArgs::default()
    };
    assert!(build_changes(&note, &bare).unwrap().is_none());

    let wrong_kind = EditArgs {
        id: "2".to_string(),
        color: Some("#000000".to_string()),
        ..EditArgs::default()
    };
    assert!(matches!(
        build_changes(&note, &wrong_kind),
        Err(CliError::InvalidEdit(_))
    ));
}

#[test]
fn build_changes_requires_group_flags_for_groups() {
    let group = group_entity();
    let bare = EditArgs {
        id: "1".to_string(),
        ..EditArgs::default()
    };
    assert!(matches!(
        build_changes(&group, &bare),
        Err(CliError::InvalidEdit(_))
    ));

    let rename = EditArgs {
        id: "1".to_string(),
        name: Some("Home".to_string()),
        ..EditArgs::default()
    };
    let Some(EntityChanges::Group(changes)) = build_changes(&group, &rename).unwrap() else {
        panic!("expected group changes");
    };
    assert_eq!(changes.name.as_deref(), Some("Home"));
    assert_eq!(changes.color, None);
}

fn settings_from(lookup: impl Fn(&str) -> Option<String>) -> Result<SyncSettings, CliError> {
    SyncSettings::from_parts(
        RemoteConfig::from_lookup(&lookup),
        Session::from_lookup(&lookup),
        SyncConfig::from_lookup(&lookup),
    )
}

#[test]
fn sync_settings_report_the_first_missing_variable() {
    let err = settings_from(lookup(&[])).unwrap_err();
    assert!(matches!(
        err,
        CliError::SyncNotConfigured("NOTESYNC_REMOTE_URL")
    ));

    let err = settings_from(lookup(&[
        ("NOTESYNC_REMOTE_URL", "https://project.example.com"),
        ("NOTESYNC_API_KEY", "anon"),
        ("NOTESYNC_OWNER_ID", "user-1"),
    ]))
    .unwrap_err();
    assert!(matches!(
        err,
        CliError::SyncNotConfigured("NOTESYNC_ACCESS_TOKEN")
    ));
}

#[test]
fn sync_settings_disable_the_periodic_timer() {
    let settings = settings_from(lookup(&[
        ("NOTESYNC_REMOTE_URL", "https://project.example.com/"),
        ("NOTESYNC_API_KEY", "anon"),
        ("NOTESYNC_OWNER_ID", "user-1"),
        ("NOTESYNC_ACCESS_TOKEN", "token"),
        ("NOTESYNC_PULL_PAGE_SIZE", "50"),
    ]))
    .unwrap();

    assert_eq!(settings.remote.base_url, "https://project.example.com");
    assert_eq!(settings.session.owner_id, "user-1");
    assert_eq!(settings.sync.periodic_interval, None);
    assert_eq!(settings.sync.pull_page_size, 50);
}

#[test]
fn sync_state_lines_include_errors() {
    let state = SyncState {
        owner_id: Some("user-1".to_string()),
        backoff_attempts: 2,
        last_error: Some("upstream down (503)".to_string()),
        last_error_at: Some(0),
        ..SyncState::default()
    };
    let lines = format_sync_state_lines(&sync_state_to_item(&state, 3));

    assert_eq!(lines[0], "owner:    user-1");
    assert_eq!(lines[1], "pending:  3");
    assert_eq!(lines[2], "last ok:  never");
    assert_eq!(lines[3], "failures: 2 in a row");
    assert!(lines[4].contains("upstream down (503)"));
}

#[tokio::test(flavor = "current_thread")]
async fn list_entities_filters_deleted_and_orders_newest_first() {
    let dir = TempDir::new().unwrap();
    let db_path = test_db_path(&dir);
    {
        let store = LocalStore::open_path(db_path.clone()).await.unwrap();
        let group = store.create_group("Work", None).await.unwrap();
        let first = store.create_note(group, "First", "a").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.create_note(group, "Second", "b").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.soft_delete_entity(first).await.unwrap();
    }

    let live = list_entities(EntityTable::Notes, false, &db_path)
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].label(), "Second");

    let all = list_entities(EntityTable::Notes, true, &db_path)
        .await
        .unwrap();
    assert_eq!(
        all.iter().map(Entity::label).collect::<Vec<_>>(),
        vec!["First", "Second"]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn history_and_queue_render_for_a_local_note() {
    let dir = TempDir::new().unwrap();
    let store = LocalStore::open_path(test_db_path(&dir)).await.unwrap();
    let group = store.create_group("Work", None).await.unwrap();
    let note = store.create_note(group, "Plan", "ship it").await.unwrap();
    store.soft_delete_entity(note).await.unwrap();

    let history = store.list_history(note).await.unwrap();
    let lines = format_history_lines(&history);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("delete"));
    assert!(lines[1].contains("create"));
    assert!(lines[1].contains("Plan"));

    // The note never reached the remote, so only the group create is queued.
    let queue = store.pending_mutations().await.unwrap();
    let lines = format_queue_lines(&queue);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("create"));
    assert!(lines[0].contains("groups/1"));

    let resolved = resolve_entity(&group.to_string(), &store).await.unwrap();
    assert_eq!(resolved.label(), "Work");
    assert!(matches!(
        resolve_entity("999", &store).await,
        Err(CliError::EntityNotFound(_))
    ));
}
