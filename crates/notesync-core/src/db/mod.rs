//! Local store: SQLite database and repositories

mod connection;
mod entity_repository;
mod history_repository;
mod migrations;
mod queue_repository;
mod sync_state_repository;

pub use connection::Database;
pub use entity_repository::EntityRepository;
pub use history_repository::HistoryRepository;
pub use queue_repository::QueueRepository;
pub use sync_state_repository::SyncStateRepository;
