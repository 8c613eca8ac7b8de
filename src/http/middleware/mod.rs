//! HTTP middleware stack.
//!
//! # Data Flow
//! ```text
//! request
//!     → timeout
//!     → recover.rs    (outer catch, for panics in the layers below)
//!     → request id (x-request-id, generated when absent, echoed back)
//!     → context.rs    (RequestContext + request logger span)
//!     → telemetry.rs  (server span, active/count/duration/size metrics)
//!     → access_log.rs (incoming / outgoing events)
//!     → recover.rs    (panic → logged, empty 500)
//!     → errors.rs     (parked handler error → translated response)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - Telemetry sits outside recovery and translation so it sees the final status
//! - Layers are attached with `Router::layer`, so each route sees its
//!   `MatchedPath`; unmatched requests use the `unmatched` route

pub mod access_log;
pub mod context;
pub mod errors;
pub mod recover;
pub mod telemetry;

pub use access_log::{access_log, AccessLogState};
pub use context::{request_context, ContextConfig};
pub use errors::translate_errors;
pub use recover::recover;
pub use telemetry::{telemetry, TelemetryState, CANCELLED_STATUS, STATUS_KEY};
