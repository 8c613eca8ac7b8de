//! HTTP transport support.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack, graceful shutdown)
//!     → middleware/ (context, telemetry, access log, recovery, translation)
//!     → handler → Result<T, HandlerError>
//!     → error.rs (error → status + {"message": ...})
//!     → response.rs (response body size)
//! ```

pub mod error;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use error::{
    status_for, HandlerError, HttpError, HttpErrorTranslator, HttpFallback, RpcStatusFallback,
};
pub use request::{Skipper, X_REQUEST_ID};
pub use server::{HttpServer, HttpStack};
