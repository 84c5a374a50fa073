//! Services layered over the database: the local store and its write paths.

pub(crate) mod mutations;
mod store;

pub use store::LocalStore;
