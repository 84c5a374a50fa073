//! Background synchronization between the local store and the remote backend.

mod backoff;
mod cycle;
mod engine;
pub mod resolver;

pub use backoff::Backoff;
pub use engine::{SyncEngine, SyncTrigger, TriggerSource};
pub use resolver::{resolve, Resolution};
