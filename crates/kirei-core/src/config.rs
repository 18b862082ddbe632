//! Process configuration
//!
//! Read once at startup from the environment (after loading `.env`), then
//! passed by reference to whatever constructs the process-scoped clients.

use std::path::PathBuf;

use crate::constants;
use crate::knowledge::CollectionSpec;
use crate::paths;

/// Runtime configuration for the service and its collaborators
#[derive(Debug, Clone)]
pub struct KireiConfig {
    /// Interface the HTTP server binds to
    pub host: String,
    /// Port the HTTP server listens on
    pub port: u16,
    /// SQLite file holding the passage collections
    pub db_path: PathBuf,
    /// Collection the retriever searches
    pub collection: CollectionSpec,
    /// Passages returned per retrieval
    pub top_k: usize,
    /// Google API key for the embedding service
    pub google_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_base_url: String,
    /// Anthropic API key for the agent loop
    pub anthropic_api_key: Option<String>,
    pub model: String,
    pub api_url: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for KireiConfig {
    fn default() -> Self {
        Self {
            host: constants::server::DEFAULT_HOST.to_string(),
            port: constants::server::DEFAULT_PORT,
            db_path: paths::knowledge_db_path(),
            collection: CollectionSpec::default(),
            top_k: constants::knowledge::TOP_K,
            google_api_key: None,
            embedding_model: constants::embeddings::DEFAULT_MODEL.to_string(),
            embedding_base_url: constants::embeddings::DEFAULT_BASE_URL.to_string(),
            anthropic_api_key: None,
            model: constants::ai::DEFAULT_MODEL.to_string(),
            api_url: constants::ai::DEFAULT_API_URL.to_string(),
            temperature: constants::ai::DEFAULT_TEMPERATURE,
            max_tokens: constants::ai::MAX_OUTPUT_TOKENS,
        }
    }
}

impl KireiConfig {
    /// Load `.env` (if present) and read configuration from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Err(e) = dotenv::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| strip_quotes(&v).to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(host) = get("KIREI_HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid PORT '{}': {}", port, e))?;
        }
        if let Some(path) = get("KIREI_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(name) = get("KIREI_COLLECTION") {
            config.collection.name = name;
        }
        if let Some(schema) = get("KIREI_SCHEMA") {
            config.collection.schema = schema;
        }
        config.google_api_key = get("GOOGLE_API_KEY");
        if let Some(model) = get("KIREI_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        config.anthropic_api_key = get("ANTHROPIC_API_KEY");
        if let Some(model) = get("KIREI_MODEL") {
            config.model = model;
        }
        if let Some(url) = get("KIREI_API_URL") {
            config.api_url = url;
        }
        if let Some(temperature) = get("KIREI_TEMPERATURE") {
            config.temperature = temperature.parse().map_err(|e| {
                anyhow::anyhow!("Invalid KIREI_TEMPERATURE '{}': {}", temperature, e)
            })?;
        }
        if let Some(max_tokens) = get("KIREI_MAX_TOKENS") {
            config.max_tokens = max_tokens.parse().map_err(|e| {
                anyhow::anyhow!("Invalid KIREI_MAX_TOKENS '{}': {}", max_tokens, e)
            })?;
        }

        Ok(config)
    }
}

/// Strip one pair of surrounding single or double quotes (and outer whitespace).
///
/// `.env` files written by hand often quote values; the quotes are not part of
/// the key.
pub fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
