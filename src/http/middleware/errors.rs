//! Error translation middleware.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::context::RequestContext;
use crate::http::error::{HttpErrorTranslator, PendingError};

/// Render the error a handler parked in its response.
///
/// Responses without a parked error pass through. When the response was
/// already committed the handler's own response is kept.
pub async fn translate_errors(
    State(translator): State<HttpErrorTranslator>,
    req: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_extensions(req.extensions());
    let mut response = next.run(req).await;
    let Some(PendingError(err)) = response.extensions_mut().remove::<PendingError>() else {
        return response;
    };
    translator
        .translate(err.as_ref(), &ctx)
        .unwrap_or(response)
}
