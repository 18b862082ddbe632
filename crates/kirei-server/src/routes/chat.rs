//! Chat endpoints: a full turn as JSON, or the turn streamed as SSE blocks.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, HeaderValue},
    response::Response,
    routing::post,
    Json, Router,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use kirei_core::stream::TurnRequest;

use crate::error::AppError;
use crate::types::{ChatRequest, ChatResponse};
use crate::AppState;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
pub const X_THREAD_ID: HeaderName = HeaderName::from_static("x-thread-id");

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(chat))
        .route("/stream", post(chat_stream))
}

/// Run a whole turn and return the final answer
async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload?;
    let thread_id = request.resolve_thread_id();
    tracing::info!(thread_id = %thread_id, "Chat turn");

    // Dropped with the handler future when the client goes away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let response = state
        .agent
        .invoke(&request.message, &thread_id, cancel)
        .await?;

    Ok(Json(ChatResponse { response }))
}

/// Stream a turn as `data: <json>\n\n` blocks
async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;
    let thread_id = request.resolve_thread_id();
    let thread_header = HeaderValue::from_str(&thread_id)
        .map_err(|_| AppError::BadRequest("thread_id is not a valid header value".into()))?;

    tracing::info!(thread_id = %thread_id, "Streaming chat turn");

    let session = state
        .coordinator
        .spawn(TurnRequest::new(thread_id, request.message));

    // Dropping the body closes the session channel, which cancels the turn
    let body = Body::from_stream(session.body.map(Ok::<_, Infallible>));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(X_THREAD_ID, thread_header);

    Ok(response)
}
