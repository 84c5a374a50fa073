//! notesync CLI - terminal front end for the offline-first note store
//!
//! Every command works against the local database; only `sync` talks to the
//! remote backend.

mod cli;
mod commands;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, GroupCommands, NoteCommands, SyncCommands};
use crate::commands::add::{run_group_add, run_note_add};
use crate::commands::common::resolve_db_path;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::history::{run_history, run_restore};
use crate::commands::list::run_list;
use crate::commands::queue::run_queue;
use crate::commands::sync::{run_sync, run_sync_failures, run_sync_status};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "notesync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Group {
            command: GroupCommands::Add { name, color },
        } => run_group_add(&name, color.as_deref(), &db_path).await?,
        Commands::Note {
            command:
                NoteCommands::Add {
                    group,
                    title,
                    content,
                },
        } => run_note_add(&group, &title, &content, &db_path).await?,
        Commands::Edit(args) => run_edit(&args, &db_path).await?,
        Commands::Delete { id } => run_delete(&id, &db_path).await?,
        Commands::List { table, all, json } => {
            run_list(table.into(), all, json, &db_path).await?;
        }
        Commands::History { id, json } => run_history(&id, json, &db_path).await?,
        Commands::Restore { id, entry } => run_restore(&id, entry, &db_path).await?,
        Commands::Queue { json } => run_queue(json, &db_path).await?,
        Commands::Sync { command: None } => run_sync(&db_path).await?,
        Commands::Sync {
            command: Some(SyncCommands::Status { json }),
        } => run_sync_status(json, &db_path).await?,
        Commands::Sync {
            command: Some(SyncCommands::Failures { limit, json }),
        } => run_sync_failures(limit, json, &db_path).await?,
    }

    Ok(())
}
