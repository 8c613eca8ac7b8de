//! Access log middleware.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Level;

use crate::http::request::Skipper;

#[derive(Debug, Clone)]
pub struct AccessLogState {
    pub level: Level,
    pub skipper: Skipper,
}

/// `incoming http req` before the handler, `outgoing http resp` with duration
/// and status after it. Both are emitted inside the request logger.
pub async fn access_log(State(state): State<AccessLogState>, req: Request, next: Next) -> Response {
    if state.skipper.skips(&req) {
        return next.run(req).await;
    }
    let level = state.level;

    crate::event_at!(level, "incoming http req");
    let started = Instant::now();
    let response = next.run(req).await;
    crate::event_at!(
        level,
        http.duration_ms = started.elapsed().as_millis() as u64,
        http.code = response.status().as_u16(),
        "outgoing http resp"
    );
    response
}
