use std::path::Path;

use crate::commands::common::{format_history_lines, open_store, parse_local_id};
use crate::error::CliError;

pub async fn run_history(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let local_id = parse_local_id(id)?;
    let store = open_store(db_path).await?;
    let entries = store.list_history(local_id).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for line in format_history_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_restore(id: &str, entry_id: i64, db_path: &Path) -> Result<(), CliError> {
    let local_id = parse_local_id(id)?;
    let store = open_store(db_path).await?;
    let result = store.restore(local_id, entry_id).await?;

    if result.applied {
        println!("Restored {local_id} to entry {entry_id} (version {})", result.version);
    } else {
        println!("{local_id} already matches entry {entry_id}");
    }
    Ok(())
}
