//! HTTP error translation.
//!
//! # Responsibilities
//! - Map `ErrorKind` to HTTP status codes and back
//! - Render `{"message": ...}` error bodies
//! - Pass `HttpError` through untouched
//! - Map everything else through the shared classification
//! - Hide internal failures behind a generic 500, logging the detail
//! - Refuse to write a response twice

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::context::RequestContext;
use crate::errors::{self, ClassifiedError, ErrorKind};

type SharedError = Arc<dyn StdError + Send + Sync>;

/// HTTP status for a classified kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidData => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Kind an HTTP status stands for. Inverse of [`status_for`].
pub fn kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::BAD_REQUEST => ErrorKind::InvalidData,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::FORBIDDEN => ErrorKind::Forbidden,
        StatusCode::CONFLICT => ErrorKind::Conflict,
        StatusCode::UNAUTHORIZED => ErrorKind::Unauthenticated,
        _ => ErrorKind::Internal,
    }
}

/// An error already expressed as an HTTP response.
#[derive(Debug, Clone)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    internal: Option<SharedError>,
}

impl HttpError {
    /// An empty message is replaced by the status reason phrase.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            internal: None,
        }
    }

    /// Attach a server-side cause. It is logged, never sent to the client.
    pub fn with_internal(mut self, err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        self.internal = Some(Arc::from(err.into()));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Client-facing message.
    pub fn message(&self) -> &str {
        if self.message.is_empty() {
            self.status.canonical_reason().unwrap_or("Unknown Error")
        } else {
            &self.message
        }
    }

    pub fn internal(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.internal.as_deref()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.internal
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut body = serde_json::to_vec(&ErrorBody {
            message: self.message(),
        })
        .unwrap_or_else(|_| br#"{"message":"Internal Server Error"}"#.to_vec());
        body.push(b'\n');

        let mut response = (self.status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

/// Secondary mapping tried when an error falls through to `Internal`.
pub trait HttpFallback: Send + Sync {
    /// `None` means "no mapping".
    fn translate(&self, err: &(dyn StdError + 'static)) -> Option<HttpError>;
}

/// Maps an RPC status found in the chain to its HTTP equivalent.
///
/// Used when an HTTP front proxies to RPC backends. Codes with a taxonomy
/// kind never get here, classification already handles them; this covers
/// the transient and capacity codes a gateway should not turn into 500.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcStatusFallback;

impl HttpFallback for RpcStatusFallback {
    fn translate(&self, err: &(dyn StdError + 'static)) -> Option<HttpError> {
        let status = errors::find::<tonic::Status>(err)?;
        let code = match status.code() {
            tonic::Code::InvalidArgument
            | tonic::Code::FailedPrecondition
            | tonic::Code::OutOfRange => StatusCode::BAD_REQUEST,
            tonic::Code::NotFound => StatusCode::NOT_FOUND,
            tonic::Code::PermissionDenied => StatusCode::FORBIDDEN,
            tonic::Code::AlreadyExists | tonic::Code::Aborted => StatusCode::CONFLICT,
            tonic::Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            tonic::Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            tonic::Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            tonic::Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            tonic::Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            _ => return None,
        };
        Some(HttpError::new(code, status.message()))
    }
}

/// Turns handler errors into HTTP responses.
#[derive(Clone, Default)]
pub struct HttpErrorTranslator {
    fallbacks: Vec<Arc<dyn HttpFallback>>,
}

impl HttpErrorTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fallback. Fallbacks run in registration order.
    pub fn with_fallback(mut self, fallback: impl HttpFallback + 'static) -> Self {
        self.fallbacks.push(Arc::new(fallback));
        self
    }

    /// Produce the response for `err`.
    ///
    /// Returns `None` when the response for this request was already written.
    pub fn translate(
        &self,
        err: &(dyn StdError + 'static),
        ctx: &RequestContext,
    ) -> Option<Response> {
        if !ctx.commit() {
            ctx.logger().in_scope(|| {
                tracing::debug!(err = %err, "response already committed, dropping error");
            });
            return None;
        }
        Some(self.to_http_error(err, ctx).into_response())
    }

    fn to_http_error(&self, err: &(dyn StdError + 'static), ctx: &RequestContext) -> HttpError {
        if let Some(http) = errors::find::<HttpError>(err) {
            if let Some(internal) = http.internal() {
                ctx.logger().in_scope(|| {
                    tracing::error!(err = %internal, code = http.status().as_u16(), "http error");
                });
            }
            return http.clone();
        }

        let classified = ClassifiedError::new(err);
        if classified.kind != ErrorKind::Internal {
            return HttpError::new(status_for(classified.kind), classified.message());
        }

        if let Some(mapped) = self.fallbacks.iter().find_map(|f| f.translate(err)) {
            return mapped;
        }

        ctx.logger().in_scope(|| {
            tracing::error!(err = %err, err.debug = ?err, "internal server error");
        });
        HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "")
    }
}

impl fmt::Debug for HttpErrorTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpErrorTranslator")
            .field("fallbacks", &self.fallbacks.len())
            .finish()
    }
}

/// Error parked in a response for the error-translation middleware.
#[derive(Clone)]
pub struct PendingError(pub SharedError);

impl fmt::Debug for PendingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingError").field(&self.0.to_string()).finish()
    }
}

/// Error type for handlers: `Result<T, HandlerError>` plus `?` on any error.
///
/// The error itself is rendered by the error-translation middleware, which has
/// the request context.
pub struct HandlerError(SharedError);

impl HandlerError {
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response.extensions_mut().insert(PendingError(self.0));
        response
    }
}
