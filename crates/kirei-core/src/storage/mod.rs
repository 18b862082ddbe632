//! Persistence layer
//!
//! SQLite connection handling shared by the knowledge collections.

mod database;

pub use database::{Database, SharedDatabase};
