//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request stacks (http, rpc) and data-layer observers produce:
//!     → logging.rs (structured log events, request logger span)
//!     → meter.rs (server instruments on an OpenTelemetry meter)
//!     → OpenTelemetry tracer (server and query spans, trace.rs for context)
//!
//! The SDK then carries the data:
//!     → batch span processor / periodic metric reader (own threads)
//!     → exclusion.rs (drop spans and data points matching configured rules)
//!     → export.rs / prometheus.rs (the export boundary)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - `Telemetry` (provider.rs) is built once and passed around; no global
//!   meter or tracer lookup
//! - Exclusion wraps exporters, so producers never change when rules do

pub mod exclusion;
pub mod export;
pub mod logging;
pub mod meter;
pub mod prometheus;
pub mod provider;
pub mod request;
pub mod resource;
pub mod trace;

pub use exclusion::{ExclusionFilter, ExclusionRule, ExclusionRules};
pub use export::{metric_points, LogSpanExporter, MetricPoint, PointValue};
pub use logging::{init_logging, LoggingError};
pub use meter::{ServerMetrics, ServerMetricsConfig};
pub use provider::{SpanBatch, Telemetry, TelemetryBuilder, TelemetryError};
pub use request::{RequestObservation, ServerTelemetry};
pub use resource::{named_resource, service_resource};
pub use trace::{extract_http, extract_rpc, parent_context, ratio_sampler};
