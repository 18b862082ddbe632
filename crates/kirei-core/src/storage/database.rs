//! SQLite connection wrapper

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::Connection;

/// Database connection shared across tasks.
///
/// `rusqlite::Connection` is not `Sync`; every access goes through the mutex,
/// and callers run queries on blocking threads.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Open SQLite database
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file, creating parent directories.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self { conn })
    }

    /// In-memory database (tests, scratch use)
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Get reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Wrap into a shareable handle
    pub fn shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }
}
