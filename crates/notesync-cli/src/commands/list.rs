use std::path::Path;

use notesync_core::EntityTable;

use crate::commands::common::{
    entity_to_list_item, format_entity_lines, list_entities, EntityListItem,
};
use crate::error::CliError;

pub async fn run_list(
    table: EntityTable,
    include_deleted: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let entities = list_entities(table, include_deleted, db_path).await?;

    if as_json {
        let json_items = entities
            .iter()
            .map(entity_to_list_item)
            .collect::<Vec<EntityListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if entities.is_empty() {
        println!("No {table} yet.");
    } else {
        for line in format_entity_lines(&entities) {
            println!("{line}");
        }
    }

    Ok(())
}
