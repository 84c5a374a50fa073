use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "Offline-first notes and groups with background sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage groups
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Edit a note or group
    Edit(EditArgs),
    /// Soft-delete a note or group
    Delete {
        /// Local id
        id: String,
    },
    /// List notes or groups
    List {
        /// Which table to list
        #[arg(long, value_enum, default_value_t = TableArg::Notes)]
        table: TableArg,
        /// Include soft-deleted entities
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recorded snapshots of an entity, newest first
    History {
        /// Local id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore an entity to a history snapshot
    Restore {
        /// Local id
        id: String,
        /// History entry id
        entry: i64,
    },
    /// Show local changes waiting to be pushed
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync cycle against the configured remote
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
}

#[derive(Subcommand)]
pub enum GroupCommands {
    /// Create a new group
    Add {
        /// Group name
        name: String,
        /// Display color as #RRGGBB
        #[arg(long)]
        color: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum NoteCommands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Owning group local id
        #[arg(long, value_name = "ID")]
        group: String,
        /// Note title
        #[arg(long)]
        title: String,
        /// Note content (stdin or $EDITOR when omitted)
        content: Vec<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct EditArgs {
    /// Local id
    pub id: String,
    /// New note title
    #[arg(long)]
    pub title: Option<String>,
    /// New note content
    #[arg(long)]
    pub content: Option<String>,
    /// Move note to another group
    #[arg(long, value_name = "ID")]
    pub group: Option<String>,
    /// New group name
    #[arg(long)]
    pub name: Option<String>,
    /// New group color
    #[arg(long)]
    pub color: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum TableArg {
    Notes,
    Groups,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show persisted sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queue entries the remote rejected
    Failures {
        /// Number of failures to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
