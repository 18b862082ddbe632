//! Centralized path utilities

use std::path::PathBuf;

use crate::constants::ui;

/// Get the kirei config directory (~/.kirei)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(ui::CONFIG_DIR_NAME)
}

/// Get the default knowledge database path (~/.kirei/knowledge.db)
pub fn knowledge_db_path() -> PathBuf {
    config_dir().join(ui::KNOWLEDGE_DB_NAME)
}
