//! Shared constants

/// Knowledge collection defaults
pub mod knowledge {
    /// Collection holding the guide passages
    pub const TABLE_NAME: &str = "jp_ai_bot";
    /// Namespace the collection table lives in
    pub const SCHEMA_NAME: &str = "public";
    /// Vector dimension fixed at collection creation
    pub const VECTOR_SIZE: usize = 3072;
    /// Passages returned per retrieval
    pub const TOP_K: usize = 4;
    /// Registry table recording every collection's dimension
    pub const REGISTRY_TABLE: &str = "kirei_collections";
}

/// Embedding collaborator defaults
pub mod embeddings {
    pub const DEFAULT_MODEL: &str = "gemini-embedding-001";
    pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
}

/// Model / agent loop defaults
pub mod ai {
    pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
    pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
    pub const ANTHROPIC_VERSION: &str = "2023-06-01";
    pub const DEFAULT_TEMPERATURE: f32 = 0.5;
    pub const MAX_OUTPUT_TOKENS: usize = 4096;
    /// Model/tool round trips allowed in a single turn
    pub const MAX_ITERATIONS: usize = 10;
    /// Node names reported on raw trace items
    pub const MODEL_NODE: &str = "model";
    pub const TOOLS_NODE: &str = "tools";
}

/// Server defaults
pub mod server {
    pub const DEFAULT_PORT: u16 = 5500;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    /// Encoded frames buffered between coordinator and transport
    pub const STREAM_CHANNEL_BUFFER: usize = 32;
}

/// Directory names
pub mod ui {
    pub const CONFIG_DIR_NAME: &str = ".kirei";
    pub const KNOWLEDGE_DB_NAME: &str = "knowledge.db";
}
