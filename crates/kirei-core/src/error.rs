//! Errors shared across the pipeline

/// The caller cancelled the operation (client disconnect or explicit signal).
///
/// Kept apart from failure types: a cancelled retrieval or session is not an
/// error and is never logged as one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;
