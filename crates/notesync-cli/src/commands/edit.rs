use std::path::Path;

use notesync_core::{Entity, EntityChanges, EntityFields, GroupChanges, NoteChanges};

use crate::cli::EditArgs;
use crate::commands::common::{
    capture_editor_input_with_initial, open_store, parse_local_id, resolve_entity,
};
use crate::error::CliError;

pub async fn run_edit(args: &EditArgs, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let entity = resolve_entity(&args.id, &store).await?;

    let changes = match build_changes(&entity, args)? {
        Some(changes) => changes,
        None => {
            let current = entity.as_note().map_or("", |note| note.content.as_str());
            let Some(edited_content) = capture_editor_input_with_initial(current)? else {
                return Err(CliError::EmptyEditedContent);
            };
            EntityChanges::Note(NoteChanges {
                content: Some(edited_content),
                ..NoteChanges::default()
            })
        }
    };

    store.update_entity(entity.local_id, &changes).await?;
    println!("{}", entity.local_id);
    Ok(())
}

/// Map edit flags onto the entity kind; `None` means open the editor on a note.
pub fn build_changes(entity: &Entity, args: &EditArgs) -> Result<Option<EntityChanges>, CliError> {
    match &entity.fields {
        EntityFields::Note(_) => {
            if args.name.is_some() || args.color.is_some() {
                return Err(CliError::InvalidEdit(
                    "--name and --color apply to groups".to_string(),
                ));
            }
            let group_id = args.group.as_deref().map(parse_local_id).transpose()?;
            if args.title.is_none() && args.content.is_none() && group_id.is_none() {
                return Ok(None);
            }
            Ok(Some(EntityChanges::Note(NoteChanges {
                title: args.title.clone(),
                content: args.content.clone(),
                group_id,
            })))
        }
        EntityFields::Group(_) => {
            if args.title.is_some() || args.content.is_some() || args.group.is_some() {
                return Err(CliError::InvalidEdit(
                    "--title, --content and --group apply to notes".to_string(),
                ));
            }
            if args.name.is_none() && args.color.is_none() {
                return Err(CliError::InvalidEdit(
                    "nothing to change; pass --name or --color".to_string(),
                ));
            }
            Ok(Some(EntityChanges::Group(GroupChanges {
                name: args.name.clone(),
                color: args.color.clone(),
            })))
        }
    }
}
