//! Kirei Core
//!
//! Retrieval and streaming pipeline behind the Kirei chat service:
//!
//! - [`knowledge`] - passage collections with idempotent setup and top-k similarity search
//! - [`embeddings`] - embedding collaborator (`Embedder`, Gemini client)
//! - [`retrieval`] - `Retriever` and the `search_knowledgebase` tool
//! - [`tools`] - explicit tool registry used by the agent loop
//! - [`agent`] - agent-loop collaborator emitting the raw execution trace
//! - [`stream`] - execution events, normalization, wire encoding, session coordination

pub mod agent;
pub mod config;
pub mod constants;
pub mod embeddings;
pub mod error;
pub mod knowledge;
pub mod paths;
pub mod retrieval;
pub mod storage;
pub mod stream;
pub mod tools;

pub use config::KireiConfig;
pub use error::Cancelled;
