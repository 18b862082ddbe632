//! Request and response types for the API

use serde::{Deserialize, Serialize};

// ============================================================================
// Chat Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Conversation thread; a fresh one is generated when omitted
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl ChatRequest {
    /// The requested thread id, or a new UUID v4 when absent or blank
    pub fn resolve_thread_id(&self) -> String {
        self.thread_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
