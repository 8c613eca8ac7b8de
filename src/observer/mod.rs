//! Observers for data-layer operations.
//!
//! # Data Flow
//! ```text
//! datastore driver finishes a query
//!     → ObservedQuery { statement, keyspace, rows, attempt, start, end, error }
//!     → ObserverChain::observe(ctx, query)
//!         → LogQueryObserver    (debug event in the request logger)
//!         → TraceQueryObserver  (span with the query's own timestamps)
//!         → MeterQueryObserver  (db.query.count, db.query.latency)
//! ```
//!
//! # Design Decisions
//! - Observers run in registration order; a failing observer is logged and
//!   the rest still run
//! - Each observer decides which error kinds are an expected miss
//!   (`MissPolicy`); a miss keeps span status OK and metric status OK

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::trace::{Span as _, SpanKind, Status, Tracer as _};
use opentelemetry_sdk::trace::SdkTracer;
use thiserror::Error;

use crate::context::{KeyValue, RequestContext};
use crate::errors::{self, ErrorKind};
use crate::observability::meter::DURATION_BUCKETS_MS;
use crate::observability::trace::parent_context;

pub const QUERY_COUNT: &str = "db.query.count";
pub const QUERY_LATENCY: &str = "db.query.latency";

/// One completed datastore operation.
#[derive(Debug, Clone)]
pub struct ObservedQuery {
    pub statement: String,
    pub keyspace: String,
    pub rows: u64,
    /// Zero for the first try, incremented per retry.
    pub attempt: u32,
    pub start: SystemTime,
    pub end: SystemTime,
    pub error: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ObservedQuery {
    pub fn latency(&self) -> Duration {
        self.end.duration_since(self.start).unwrap_or_default()
    }

    pub fn error(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("{0}")]
    Failed(String),
}

/// Error kinds an integration treats as an expected empty result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissPolicy {
    expected: Vec<ErrorKind>,
}

impl MissPolicy {
    pub fn new(expected: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            expected: expected.into_iter().collect(),
        }
    }

    /// Every error is a failure.
    pub fn strict() -> Self {
        Self {
            expected: Vec::new(),
        }
    }

    /// True when `err` is present and is not an expected miss.
    pub fn is_failure(&self, err: Option<&(dyn StdError + 'static)>) -> bool {
        match err {
            None => false,
            Some(_) if self.expected.is_empty() => true,
            Some(_) => !errors::is_one_of(err, &self.expected),
        }
    }
}

impl Default for MissPolicy {
    fn default() -> Self {
        Self::new([ErrorKind::NotFound])
    }
}

/// Subscriber to "query observed" events.
pub trait QueryObserver: Send + Sync {
    fn name(&self) -> &'static str;

    fn observe(&self, ctx: &RequestContext, query: &ObservedQuery) -> Result<(), ObserverError>;
}

/// Runs observers in registration order.
#[derive(Clone, Default)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn QueryObserver>>,
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl QueryObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn observe(&self, ctx: &RequestContext, query: &ObservedQuery) {
        for observer in &self.observers {
            if let Err(e) = observer.observe(ctx, query) {
                ctx.logger().in_scope(|| {
                    tracing::warn!(observer = observer.name(), error = %e, "query observer failed");
                });
            }
        }
    }
}

/// Debug event per query.
#[derive(Debug, Clone, Default)]
pub struct LogQueryObserver {
    pub disabled: bool,
}

impl QueryObserver for LogQueryObserver {
    fn name(&self) -> &'static str {
        "log"
    }

    fn observe(&self, ctx: &RequestContext, query: &ObservedQuery) -> Result<(), ObserverError> {
        if self.disabled {
            return Ok(());
        }
        ctx.logger().in_scope(|| match query.error() {
            Some(err) => tracing::debug!(
                latency_ms = query.latency().as_millis() as u64,
                statement = %query.statement,
                keyspace = %query.keyspace,
                rows = query.rows,
                attempt = query.attempt,
                err = %err,
                "db query"
            ),
            None => tracing::debug!(
                latency_ms = query.latency().as_millis() as u64,
                statement = %query.statement,
                keyspace = %query.keyspace,
                rows = query.rows,
                attempt = query.attempt,
                "db query"
            ),
        });
        Ok(())
    }
}

/// Child span of the request span, timed by the query itself.
#[derive(Debug, Clone)]
pub struct TraceQueryObserver {
    tracer: SdkTracer,
    system: &'static str,
    policy: MissPolicy,
    pub disabled: bool,
}

impl TraceQueryObserver {
    pub fn new(tracer: SdkTracer, system: &'static str) -> Self {
        Self {
            tracer,
            system,
            policy: MissPolicy::default(),
            disabled: false,
        }
    }

    pub fn with_policy(mut self, policy: MissPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl QueryObserver for TraceQueryObserver {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn observe(&self, ctx: &RequestContext, query: &ObservedQuery) -> Result<(), ObserverError> {
        if self.disabled {
            return Ok(());
        }
        let mut span = self
            .tracer
            .span_builder("db.query")
            .with_kind(SpanKind::Client)
            .with_start_time(query.start)
            .with_attributes([
                KeyValue::new("db.statement", query.statement.clone()),
                KeyValue::new("db.system", self.system),
                KeyValue::new("db.namespace", query.keyspace.clone()),
                KeyValue::new("db.rows", i64::try_from(query.rows).unwrap_or(i64::MAX)),
                KeyValue::new("db.attempt", i64::from(query.attempt)),
            ])
            .start_with_context(&self.tracer, &parent_context(ctx.span_context()));

        match query.error() {
            Some(err) if self.policy.is_failure(Some(err)) => {
                span.record_error(err);
                span.set_status(Status::error(err.to_string()));
            }
            _ => span.set_status(Status::Ok),
        }
        span.end_with_timestamp(query.end);
        Ok(())
    }
}

/// Query count and latency, attributed with the request's bag snapshot.
#[derive(Debug, Clone)]
pub struct MeterQueryObserver {
    count: Counter<u64>,
    latency: Histogram<f64>,
    system: &'static str,
    policy: MissPolicy,
    pub disabled: bool,
}

impl MeterQueryObserver {
    pub fn new(meter: &Meter, system: &'static str) -> Self {
        Self {
            count: meter
                .u64_counter(QUERY_COUNT)
                .with_unit("{query}")
                .with_description("Number of datastore queries")
                .build(),
            latency: meter
                .f64_histogram(QUERY_LATENCY)
                .with_unit("ms")
                .with_description("Datastore query latency")
                .with_boundaries(DURATION_BUCKETS_MS.to_vec())
                .build(),
            system,
            policy: MissPolicy::default(),
            disabled: false,
        }
    }

    pub fn with_policy(mut self, policy: MissPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl QueryObserver for MeterQueryObserver {
    fn name(&self) -> &'static str {
        "meter"
    }

    fn observe(&self, ctx: &RequestContext, query: &ObservedQuery) -> Result<(), ObserverError> {
        if self.disabled {
            return Ok(());
        }
        let mut attributes = ctx.attributes();
        attributes.insert(KeyValue::new("db.system", self.system));
        let status = if self.policy.is_failure(query.error()) {
            "ERROR"
        } else {
            "OK"
        };
        attributes.insert(KeyValue::new("otel.status_code", status));
        if query.attempt > 0 {
            attributes.insert(KeyValue::new("with_retry", true));
        }
        attributes.insert(KeyValue::new("db.namespace", query.keyspace.clone()));

        self.count.add(1, attributes.as_slice());
        self.latency.record(query.latency().as_nanos() as f64 / 1e6, attributes.as_slice());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Value;
    use crate::observability::export::{metric_points, MetricPoint};
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry::trace::{Span as _, Tracer as _, TracerProvider as _};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn query(error: Option<errors::Error>) -> ObservedQuery {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        ObservedQuery {
            statement: "SELECT * FROM users WHERE id = ?".into(),
            keyspace: "accounts".into(),
            rows: 0,
            attempt: 1,
            start,
            end: start + Duration::from_millis(12),
            error: error.map(|e| Arc::new(e) as Arc<dyn StdError + Send + Sync>),
        }
    }

    fn traced(policy: MissPolicy, query: &ObservedQuery) -> SpanData {
        let sink = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(sink.clone())
            .build();
        TraceQueryObserver::new(provider.tracer("test"), "cassandra")
            .with_policy(policy)
            .observe(&RequestContext::default(), query)
            .unwrap();
        sink.get_finished_spans().unwrap().remove(0)
    }

    fn metered(ctx: &RequestContext, query: &ObservedQuery) -> Vec<MetricPoint> {
        let sink = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_periodic_exporter(sink.clone())
            .build();
        MeterQueryObserver::new(&provider.meter("test"), "cassandra")
            .observe(ctx, query)
            .unwrap();
        provider.force_flush().unwrap();
        metric_points(sink.get_finished_metrics().unwrap().last().unwrap())
    }

    #[derive(Default)]
    struct Counting(Arc<AtomicUsize>);

    impl QueryObserver for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn observe(&self, _ctx: &RequestContext, _q: &ObservedQuery) -> Result<(), ObserverError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl QueryObserver for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn observe(&self, _ctx: &RequestContext, _q: &ObservedQuery) -> Result<(), ObserverError> {
            Err(ObserverError::Failed("exporter gone".into()))
        }
    }

    #[test]
    fn test_miss_keeps_span_ok() {
        let span = traced(
            MissPolicy::default(),
            &query(Some(ErrorKind::NotFound.wrap("user 1"))),
        );
        assert_eq!(span.status, Status::Ok);
        assert_eq!(span.span_kind, SpanKind::Client);
        assert!(span.events.is_empty());
        assert_eq!(
            span.end_time.duration_since(span.start_time).unwrap(),
            Duration::from_millis(12)
        );
    }

    #[test]
    fn test_strict_policy_marks_miss_as_error() {
        let span = traced(
            MissPolicy::strict(),
            &query(Some(ErrorKind::NotFound.wrap("user 1"))),
        );
        assert_eq!(span.status, Status::error("user 1: not found"));
        assert_eq!(span.events[0].name, "exception");
    }

    #[test]
    fn test_real_failure_is_error() {
        let span = traced(MissPolicy::default(), &query(Some(errors::Error::internal("timeout"))));
        assert!(matches!(span.status, Status::Error { .. }));
        assert!(span
            .attributes
            .contains(&KeyValue::new("db.attempt", 1i64)));
    }

    #[test]
    fn test_query_span_is_child_of_request() {
        let sink = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(sink.clone())
            .build();
        let tracer = provider.tracer("test");
        let request_span = tracer.start("GET /users/{id}");
        let ctx = RequestContext::default();
        ctx.set_span_context(request_span.span_context().clone());

        TraceQueryObserver::new(tracer, "cassandra")
            .observe(&ctx, &query(None))
            .unwrap();

        let spans = sink.get_finished_spans().unwrap();
        let parent = ctx.span_context().unwrap();
        assert_eq!(spans[0].parent_span_id, parent.span_id());
        assert_eq!(spans[0].span_context.trace_id(), parent.trace_id());
    }

    #[test]
    fn test_meter_attributes() {
        let ctx = RequestContext::default();
        ctx.set_attribute(KeyValue::new("tenant.id", "acme"));

        let points = metered(&ctx, &query(Some(ErrorKind::NotFound.wrap("user 1"))));
        assert_eq!(points.len(), 2);
        let count = points.iter().find(|p| p.name == QUERY_COUNT).unwrap();
        assert_eq!(count.attribute("otel.status_code"), Some(&Value::from("OK")));
        assert_eq!(count.attribute("with_retry"), Some(&Value::Bool(true)));
        assert_eq!(count.attribute("tenant.id"), Some(&Value::from("acme")));

        let latency = points.iter().find(|p| p.name == QUERY_LATENCY).unwrap();
        assert_eq!(latency.sum(), 12.0);
        // The request bag is only read, never consumed.
        assert_eq!(ctx.attributes().len(), 1);
    }

    #[test]
    fn test_failing_observer_does_not_block_others() {
        let counted = Arc::new(AtomicUsize::new(0));
        let chain = ObserverChain::new()
            .with(LogQueryObserver::default())
            .with(Failing)
            .with(Counting(Arc::clone(&counted)));

        chain.observe(&RequestContext::default(), &query(None));
        assert_eq!(chain.len(), 3);
        assert_eq!(counted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_miss_policy() {
        let miss: &(dyn StdError + 'static) = &ErrorKind::NotFound.wrap("x");
        let conflict: &(dyn StdError + 'static) = &ErrorKind::Conflict.wrap("x");
        let policy = MissPolicy::default();
        assert!(!policy.is_failure(None));
        assert!(!policy.is_failure(Some(miss)));
        assert!(policy.is_failure(Some(conflict)));
        assert!(MissPolicy::strict().is_failure(Some(miss)));
    }
}
