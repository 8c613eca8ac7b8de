//! Panic recovery middleware.

use std::panic::AssertUnwindSafe;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;

use crate::context::RequestContext;
use crate::errors::log_panic;

/// Catch a panic in the inner service, log it with its stack and answer with
/// an empty 500. The panic message never reaches the client.
pub async fn recover(req: Request, next: Next) -> Response {
    let ctx = RequestContext::from_extensions(req.extensions());
    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            log_panic(&ctx, payload.as_ref(), "http handler panicked and recovered");
            ctx.commit();
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
