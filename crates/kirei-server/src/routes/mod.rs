//! API routes

use axum::Router;

use crate::AppState;

mod chat;

pub use chat::X_THREAD_ID;

/// Build the API router with all endpoints
pub fn api_router() -> Router<AppState> {
    Router::new().nest("/chat", chat::router())
}
