//! Request context middleware.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use tracing::field::Empty;
use tracing::Instrument;

use crate::context::{RequestContext, UNMATCHED_ROUTE};
use crate::http::request::request_id;

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextConfig {
    /// Add uri, host, peer address and user agent to the request logger.
    pub log_request_details: bool,
}

/// Build the request logger and store a [`RequestContext`] in the request
/// extensions. The rest of the request runs inside the logger span.
pub async fn request_context(
    State(config): State<ContextConfig>,
    mut req: Request,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_owned());

    let logger = tracing::info_span!(
        "http",
        http.method = %req.method(),
        http.route = %route,
        request_id = request_id(req.headers()).unwrap_or_default(),
        http.uri = Empty,
        http.host = Empty,
        net.peer = Empty,
        user_agent = Empty,
        trace_id = Empty,
        span_id = Empty,
    );

    if config.log_request_details {
        logger.record("http.uri", tracing::field::display(req.uri()));
        if let Some(host) = req.headers().get(header::HOST).and_then(|v| v.to_str().ok()) {
            logger.record("http.host", host);
        }
        if let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
            logger.record("net.peer", tracing::field::display(peer));
        }
        if let Some(agent) = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
        {
            logger.record("user_agent", agent);
        }
    }

    let ctx = RequestContext::with_route(logger.clone(), route);
    req.extensions_mut().insert(ctx);
    next.run(req).instrument(logger).await
}
