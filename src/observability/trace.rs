//! Trace context propagation and sampling.
//!
//! # Responsibilities
//! - Read a W3C `traceparent` parent from HTTP headers or RPC metadata
//! - Build the parent-based ratio sampler used for root spans
//! - Turn an optional parent span context into the `Context` spans start from

use axum::http::HeaderMap;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::Sampler;
use tonic::metadata::{KeyRef, MetadataMap};

pub const TRACEPARENT: &str = "traceparent";

/// Keep `rate` of new traces; children follow their parent's decision.
pub fn ratio_sampler(rate: f64) -> Sampler {
    Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(rate)))
}

/// Context to start a span from. `None` starts a new trace.
pub fn parent_context(parent: Option<SpanContext>) -> Context {
    match parent {
        Some(span_context) if span_context.is_valid() => {
            Context::new().with_remote_span_context(span_context)
        }
        _ => Context::new(),
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

struct MetadataExtractor<'a>(&'a MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(|k| match k {
                KeyRef::Ascii(k) => k.as_str(),
                KeyRef::Binary(k) => k.as_str(),
            })
            .collect()
    }
}

/// Propagated parent from HTTP headers, if a valid one is present.
pub fn extract_http(headers: &HeaderMap) -> Option<SpanContext> {
    remote_parent(TraceContextPropagator::new().extract(&HeaderExtractor(headers)))
}

/// Propagated parent from RPC metadata, if a valid one is present.
pub fn extract_rpc(metadata: &MetadataMap) -> Option<SpanContext> {
    remote_parent(TraceContextPropagator::new().extract(&MetadataExtractor(metadata)))
}

fn remote_parent(cx: Context) -> Option<SpanContext> {
    let span_context = cx.span().span_context().clone();
    span_context.is_valid().then_some(span_context)
}
