//! Per-request observation shared by the HTTP and RPC stacks.
//!
//! # Responsibilities
//! - Count the request as active for its whole lifetime
//! - Start the server span (continuing a propagated parent)
//! - At completion: read the attribute bag once, record count/duration/size,
//!   copy the attributes onto the span and end it
//! - When the request future is dropped first, record the partial duration
//!   with a cancellation status instead of losing the measurement

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use opentelemetry::trace::{Span as _, SpanContext, SpanKind, Status, Tracer as _, TracerProvider as _};
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider, Span};

use crate::context::{AttributeBag, KeyValue, RequestContext};
use crate::observability::meter::{ActiveRequestGuard, ServerMetrics};
use crate::observability::trace::parent_context;

/// Span status description used for dropped requests.
pub const CANCELLED_DESCRIPTION: &str = "request cancelled";

/// Tracer and server instruments for one transport.
#[derive(Debug, Clone)]
pub struct ServerTelemetry {
    pub tracer: SdkTracer,
    pub metrics: Arc<ServerMetrics>,
}

impl ServerTelemetry {
    pub fn new(tracer: SdkTracer, metrics: ServerMetrics) -> Self {
        Self {
            tracer,
            metrics: Arc::new(metrics),
        }
    }

    /// Span ids still propagate, nothing is recorded.
    pub fn disabled() -> Self {
        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOff)
            .build();
        Self::new(provider.tracer("service-kit"), ServerMetrics::disabled())
    }
}

/// How a request ended.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Status attribute, e.g. `http.response.status_code=404`.
    pub status: KeyValue,
    /// `Some` marks the span as failed with this description.
    pub error: Option<String>,
}

impl Outcome {
    pub fn ok(status: KeyValue) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn failed(status: KeyValue, description: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(description.into()),
        }
    }
}

/// What to record if the request never completes.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub status: KeyValue,
}

/// Parameters for [`RequestObservation::start`].
#[derive(Debug)]
pub struct ObservationStart {
    pub span_name: Cow<'static, str>,
    pub parent: Option<SpanContext>,
    /// Attributes known at entry (method, route). Added to the bag and used for
    /// the active-request counter.
    pub attributes: Vec<KeyValue>,
    pub request_size: Option<u64>,
    pub cancellation: Cancellation,
}

/// In-flight measurement of one request.
#[derive(Debug)]
pub struct RequestObservation {
    ctx: RequestContext,
    metrics: Arc<ServerMetrics>,
    span: Option<Span>,
    active: Option<ActiveRequestGuard>,
    started: Instant,
    request_size: Option<u64>,
    cancellation: Cancellation,
}

impl RequestObservation {
    pub fn start(telemetry: &ServerTelemetry, ctx: RequestContext, start: ObservationStart) -> Self {
        ctx.set_attributes(start.attributes.iter().cloned());
        let active = telemetry.metrics.track_active(start.attributes);

        let span = telemetry
            .tracer
            .span_builder(start.span_name)
            .with_kind(SpanKind::Server)
            .with_start_time(SystemTime::now())
            .start_with_context(&telemetry.tracer, &parent_context(start.parent));
        ctx.set_span_context(span.span_context().clone());

        Self {
            ctx,
            metrics: Arc::clone(&telemetry.metrics),
            span: Some(span),
            active: Some(active),
            started: Instant::now(),
            request_size: start.request_size,
            cancellation: start.cancellation,
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Record the finished request. Returns the final attributes, including
    /// the status, for measurements taken later (response body size).
    pub fn finish(mut self, outcome: Outcome) -> AttributeBag {
        self.complete(outcome)
    }

    fn complete(&mut self, outcome: Outcome) -> AttributeBag {
        let duration = self.started.elapsed();
        self.ctx.set_attribute(outcome.status);
        let attributes = self.ctx.take_attributes();

        self.metrics
            .record_completion(attributes.as_slice(), duration, self.request_size);

        if let Some(mut span) = self.span.take() {
            span.set_attributes(attributes.iter().cloned());
            match outcome.error {
                Some(description) => span.set_status(Status::error(description)),
                None => span.set_status(Status::Ok),
            }
            span.end();
        }

        self.active.take();
        attributes
    }
}

impl Drop for RequestObservation {
    fn drop(&mut self) {
        if self.span.is_none() {
            return;
        }
        let status = self.cancellation.status.clone();
        self.ctx.logger().in_scope(|| {
            tracing::debug!(
                elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0,
                "request dropped before completion"
            );
        });
        self.complete(Outcome::failed(status, CANCELLED_DESCRIPTION));
    }
}
