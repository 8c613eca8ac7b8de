//! Observability and error-translation toolkit for Axum and tonic services.

// Request plumbing
pub mod context;
pub mod errors;
pub mod http;
pub mod rpc;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod observer;

pub use config::ServiceConfig;
pub use context::RequestContext;
pub use errors::{Error, ErrorKind};
pub use http::{HttpServer, HttpStack};
pub use lifecycle::Shutdown;
pub use observability::Telemetry;
