use std::path::Path;

use crate::commands::common::{open_store, resolve_entity};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let entity = resolve_entity(id, &store).await?;

    store.soft_delete_entity(entity.local_id).await?;
    println!("{}", entity.local_id);
    Ok(())
}
