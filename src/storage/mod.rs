//! Durable storage for the index.

pub mod sqlite;

pub use sqlite::{SqliteStore, StoreEntry};
