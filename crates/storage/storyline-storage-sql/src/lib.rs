//! Storyline SQL storage
//!
//! SQLite implementation of the storyline persistence port.

#![warn(clippy::all)]

// Re-exports
pub use storyline_core;

pub mod sqlite;

pub use sqlite::SqliteStore;
