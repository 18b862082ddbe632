//! Tools the agent can call
//!
//! Provides the tool registry; concrete tools live next to the capability
//! they expose (see [`crate::retrieval::KnowledgeSearchTool`]).

pub mod registry;

pub use registry::{
    parse_params, Tool, ToolContext, ToolDefinition, ToolError, ToolRegistry, ToolResult,
};
