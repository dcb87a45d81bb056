// src/logging_middleware.rs
//! Middleware for logging requests in debug mode

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::debug;

use crate::common::helpers::mask_query;

/// Logs method, path, status and latency. Callback codes, state nonces and
/// tokens in the query string are masked.
pub async fn log_request_response(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(mask_query);
    let started = Instant::now();

    debug!(
        method = %method,
        path = %path,
        query = ?query,
        "📥 Request"
    );

    let response = next.run(request).await;

    debug!(
        method = %method,
        path = %path,
        status = %response.status(),
        latency_ms = started.elapsed().as_millis() as u64,
        "📤 Response"
    );

    response
}
