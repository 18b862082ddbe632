//! Streaming pipeline
//!
//! Raw agent trace → [`EventNormalizer`] → [`ExecutionEvent`] →
//! [`StreamEncoder`] → bytes, driven per session by [`StreamCoordinator`].

mod coordinator;
mod encoder;
mod events;
mod normalizer;

pub use coordinator::{SessionState, StreamCoordinator, StreamSession, TurnRequest};
pub use encoder::StreamEncoder;
pub use events::ExecutionEvent;
pub use normalizer::{extract_token, EventNormalizer, TokenShape};
