//! Per-request context carried through the handler chain.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::Extensions;
use opentelemetry::trace::SpanContext;
use parking_lot::Mutex;
use tracing::Span;

use crate::context::attributes::{AttributeBag, KeyValue};

/// Route template used when no route matched.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Request-scoped logger, attribute bag and response state.
///
/// Cloning is cheap and every clone refers to the same request.
#[derive(Clone, Debug)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    logger: Span,
    route: Option<String>,
    attributes: Mutex<AttributeBag>,
    committed: AtomicBool,
    span_context: OnceLock<SpanContext>,
}

impl RequestContext {
    /// Create a context around a request-scoped logger span.
    pub fn new(logger: Span) -> Self {
        Self::build(logger, None)
    }

    /// Create a context for a request that matched `route`.
    pub fn with_route(logger: Span, route: impl Into<String>) -> Self {
        Self::build(logger, Some(route.into()))
    }

    fn build(logger: Span, route: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                logger,
                route,
                attributes: Mutex::new(AttributeBag::new()),
                committed: AtomicBool::new(false),
                span_context: OnceLock::new(),
            }),
        }
    }

    /// Context stored by the middleware, or a default one.
    pub fn from_extensions(extensions: &Extensions) -> Self {
        extensions.get::<Self>().cloned().unwrap_or_default()
    }

    /// The request-scoped logger. Events emitted inside it carry its fields.
    pub fn logger(&self) -> &Span {
        &self.inner.logger
    }

    /// Route template, if one was resolved.
    pub fn route(&self) -> Option<&str> {
        self.inner.route.as_deref()
    }

    pub fn set_attribute(&self, kv: KeyValue) {
        self.inner.attributes.lock().insert(kv);
    }

    pub fn set_attributes(&self, kvs: impl IntoIterator<Item = KeyValue>) {
        self.inner.attributes.lock().extend(kvs);
    }

    /// Snapshot of the attributes collected so far.
    pub fn attributes(&self) -> AttributeBag {
        self.inner.attributes.lock().clone()
    }

    /// Final read of the bag. Leaves it empty.
    pub fn take_attributes(&self) -> AttributeBag {
        std::mem::take(&mut *self.inner.attributes.lock())
    }

    /// Mark the response as written.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn commit(&self) -> bool {
        !self.inner.committed.swap(true, Ordering::AcqRel)
    }

    pub fn is_committed(&self) -> bool {
        self.inner.committed.load(Ordering::Acquire)
    }

    /// Trace context of the server span, once tracing has started.
    pub fn span_context(&self) -> Option<SpanContext> {
        self.inner.span_context.get().cloned()
    }

    /// Attach the server span context and record its ids on the logger.
    ///
    /// Only the first call has an effect. Invalid contexts are ignored.
    pub fn set_span_context(&self, span_context: SpanContext) {
        if !span_context.is_valid() {
            return;
        }
        let trace_id = span_context.trace_id();
        let span_id = span_context.span_id();
        if self.inner.span_context.set(span_context).is_ok() {
            let logger = &self.inner.logger;
            logger.record("trace_id", tracing::field::display(trace_id));
            logger.record("span_id", tracing::field::display(span_id));
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Span::none())
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_extensions(&parts.extensions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Value;

    #[test]
    fn test_missing_context_defaults() {
        let ctx = RequestContext::from_extensions(&Extensions::new());
        assert!(ctx.logger().is_none());
        assert!(ctx.attributes().is_empty());
        assert_eq!(ctx.route(), None);
        assert!(!ctx.is_committed());
    }

    #[test]
    fn test_commit_happens_once() {
        let ctx = RequestContext::default();
        let clone = ctx.clone();
        assert!(ctx.commit());
        assert!(!clone.commit());
        assert!(clone.is_committed());
    }

    #[test]
    fn test_take_attributes_is_final_read() {
        let ctx = RequestContext::with_route(Span::none(), "/users/{id}");
        ctx.set_attribute(KeyValue::new("tenant.id", "acme"));
        ctx.set_attributes([KeyValue::new("tenant.id", "globex"), KeyValue::new("n", 1i64)]);

        let snapshot = ctx.attributes();
        assert_eq!(snapshot.get("tenant.id"), Some(&Value::from("globex")));

        let bag = ctx.take_attributes();
        assert_eq!(bag.len(), 2);
        assert!(ctx.attributes().is_empty());
        assert_eq!(ctx.route(), Some("/users/{id}"));
    }

    #[test]
    fn test_first_valid_span_context_wins() {
        use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState};

        let ctx = RequestContext::default();
        ctx.set_span_context(SpanContext::empty_context());
        assert!(ctx.span_context().is_none());

        let first = SpanContext::new(
            TraceId::from(7u128),
            SpanId::from(9u64),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        );
        ctx.set_span_context(first.clone());
        ctx.set_span_context(SpanContext::new(
            TraceId::from(8u128),
            SpanId::from(10u64),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        ));
        assert_eq!(ctx.span_context(), Some(first));
    }

    #[test]
    fn test_extensions_round_trip_shares_state() {
        let ctx = RequestContext::default();
        let mut ext = Extensions::new();
        ext.insert(ctx.clone());

        RequestContext::from_extensions(&ext).set_attribute(KeyValue::new("k", true));
        assert_eq!(ctx.attributes().get("k"), Some(&Value::Bool(true)));
    }
}
