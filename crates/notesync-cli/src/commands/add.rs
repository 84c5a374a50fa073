use std::path::Path;

use crate::commands::common::{open_store, parse_local_id, resolve_note_content};
use crate::error::CliError;

pub async fn run_group_add(
    name: &str,
    color: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let local_id = store.create_group(name, color).await?;

    println!("{local_id}");
    Ok(())
}

pub async fn run_note_add(
    group: &str,
    title: &str,
    content_parts: &[String],
    db_path: &Path,
) -> Result<(), CliError> {
    let group_id = parse_local_id(group)?;
    let content = resolve_note_content(content_parts)?;

    let store = open_store(db_path).await?;
    let local_id = store.create_note(group_id, title, &content).await?;

    println!("{local_id}");
    Ok(())
}
