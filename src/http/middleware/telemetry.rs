//! Server span and request metrics.
//!
//! # Responsibilities
//! - Continue a propagated trace (`traceparent`)
//! - Count the request as active while it runs
//! - Record count, duration, request size and response size with the
//!   request's attribute bag
//! - Mark 5xx responses as failed spans
//!
//! # Design Decisions
//! - Route templates, never raw paths, go into attributes
//! - A request dropped mid-flight is recorded with status 499

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::context::{KeyValue, RequestContext, UNMATCHED_ROUTE};
use crate::http::request::{approximate_size, Skipper};
use crate::http::response::measure_body;
use crate::observability::request::{
    Cancellation, ObservationStart, Outcome, RequestObservation, ServerTelemetry,
};
use crate::observability::trace::extract_http;

pub const STATUS_KEY: &str = "http.response.status_code";

/// Status recorded for requests the client abandoned.
pub const CANCELLED_STATUS: i64 = 499;

#[derive(Debug, Clone)]
pub struct TelemetryState {
    pub telemetry: ServerTelemetry,
    pub skipper: Skipper,
}

pub async fn telemetry(State(state): State<TelemetryState>, req: Request, next: Next) -> Response {
    if state.skipper.skips(&req) {
        return next.run(req).await;
    }

    let ctx = RequestContext::from_extensions(req.extensions());
    let method = req.method().as_str().to_owned();
    let route = ctx.route().unwrap_or(UNMATCHED_ROUTE).to_owned();

    let observation = RequestObservation::start(
        &state.telemetry,
        ctx,
        ObservationStart {
            span_name: format!("{method} {route}").into(),
            parent: extract_http(req.headers()),
            attributes: vec![
                KeyValue::new("http.request.method", method),
                KeyValue::new("http.route", route),
            ],
            request_size: Some(approximate_size(&req)),
            cancellation: Cancellation {
                status: KeyValue::new(STATUS_KEY, CANCELLED_STATUS),
            },
        },
    );

    let response = next.run(req).await;
    let status = response.status();
    let code = KeyValue::new(STATUS_KEY, i64::from(status.as_u16()));
    let outcome = if status.is_server_error() {
        Outcome::failed(code, status.canonical_reason().unwrap_or("server error"))
    } else {
        Outcome::ok(code)
    };
    let attributes = observation.finish(outcome);

    match state.telemetry.metrics.response_size() {
        Some(histogram) => {
            let (parts, body) = response.into_parts();
            let body = measure_body(body, histogram.clone(), attributes.into_vec());
            Response::from_parts(parts, body)
        }
        None => response,
    }
}
