//! Request-side helpers.
//!
//! # Responsibilities
//! - Read the request id set by the request-id layer
//! - Estimate the request size for the size histogram
//! - Decide which requests skip telemetry and access logging
//!
//! # Design Decisions
//! - The size is an approximation of the wire size of the request head plus
//!   the declared body length; the body itself is never read

use std::fmt;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderMap};

/// Request id header, set by the request-id layer when absent.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Request id of `headers`, if present and valid UTF-8.
pub fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
}

/// Approximate size of the request in bytes: method, path and query,
/// protocol version, header names and values, and the declared
/// `content-length`.
pub fn approximate_size<B>(req: &Request<B>) -> u64 {
    let mut size = req.method().as_str().len();
    size += req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().len())
        .unwrap_or(1);
    size += format!("{:?}", req.version()).len();

    for (name, value) in req.headers() {
        size += name.as_str().len() + value.len();
    }
    if req.headers().get(header::HOST).is_none() {
        size += req.uri().host().map(str::len).unwrap_or(0);
    }

    let body = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    size as u64 + body
}

/// Predicate selecting requests that bypass telemetry and access logging.
#[derive(Clone)]
pub struct Skipper(Arc<dyn Fn(&Request) -> bool + Send + Sync>);

impl Skipper {
    pub fn new(predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Skips nothing.
    pub fn never() -> Self {
        Self::new(|_| false)
    }

    /// Skips requests whose path equals one of `paths`.
    pub fn paths(paths: impl IntoIterator<Item = String>) -> Self {
        let paths: Vec<String> = paths.into_iter().collect();
        if paths.is_empty() {
            return Self::never();
        }
        Self::new(move |req| paths.iter().any(|p| p == req.uri().path()))
    }

    pub fn skips(&self, req: &Request) -> bool {
        (self.0)(req)
    }
}

impl Default for Skipper {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for Skipper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Skipper")
    }
}
