//! Request-scoped logger and attribute accumulator.
//!
//! # Data Flow
//! ```text
//! http::middleware::context / rpc::interceptor
//!     → RequestContext::new(logger span) + route template
//!     → stored in request extensions (HTTP) or passed to the handler (RPC)
//!
//! any stage of the handler
//!     → ctx.set_attribute(KeyValue::new("tenant.id", ...))
//!
//! instrumentation (observability::request)
//!     → ctx.take_attributes()  (the single final read)
//!     → metric data point and server span attributes
//! ```
//!
//! # Design Decisions
//! - The context is request-local; it is cloned within a request, never shared
//!   across requests
//! - Lookup never fails: a missing context yields a default one whose logger
//!   falls through to the global subscriber
//! - Route templates, not raw paths, to keep attribute cardinality bounded

pub mod attributes;
pub mod request;

pub use attributes::{AttributeBag, KeyValue, Value};
pub use request::{RequestContext, UNMATCHED_ROUTE};
