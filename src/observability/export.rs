//! The export boundary.
//!
//! # Responsibilities
//! - Span exporter that writes finished spans to the log
//! - Flatten collected metrics into `MetricPoint`s for exporters that do not
//!   speak the SDK data model (Prometheus bridge, tests)
//! - Data-point filtering shared by the exclusion filter
//!
//! # Design Decisions
//! - Batching, sampling and instrument caching belong to the OpenTelemetry SDK;
//!   this module only adapts its output

use std::any::Any;

use opentelemetry::trace::SpanId;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::data::{Aggregation, Gauge, Histogram, Metric, ResourceMetrics, Sum};
use opentelemetry_sdk::trace::{SpanData, SpanExporter};

use crate::context::{KeyValue, Value};

/// Writes finished spans as debug events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSpanExporter;

impl SpanExporter for LogSpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> OTelSdkResult {
        for span in batch {
            let duration = span
                .end_time
                .duration_since(span.start_time)
                .unwrap_or_default();
            let parent_id = if span.parent_span_id == SpanId::INVALID {
                String::new()
            } else {
                span.parent_span_id.to_string()
            };
            tracing::debug!(
                span.name = %span.name,
                trace_id = %span.span_context.trace_id(),
                span_id = %span.span_context.span_id(),
                parent_id = %parent_id,
                duration_ms = duration.as_secs_f64() * 1000.0,
                status = ?span.status,
                attributes = span.attributes.len(),
                "span finished"
            );
        }
        Ok(())
    }
}

/// The value of one data point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Sum { value: f64, monotonic: bool },
    Gauge(f64),
    Histogram {
        count: u64,
        sum: f64,
        bounds: Vec<f64>,
        bucket_counts: Vec<u64>,
    },
}

/// One attribute set of one metric, as collected.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub unit: String,
    pub attributes: Vec<KeyValue>,
    pub value: PointValue,
}

impl MetricPoint {
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    /// Sum or gauge value, or the observation count of a histogram.
    pub fn count(&self) -> f64 {
        match &self.value {
            PointValue::Sum { value, .. } | PointValue::Gauge(value) => *value,
            PointValue::Histogram { count, .. } => *count as f64,
        }
    }

    /// Sum of histogram observations. Sums and gauges return their value.
    pub fn sum(&self) -> f64 {
        match &self.value {
            PointValue::Sum { value, .. } | PointValue::Gauge(value) => *value,
            PointValue::Histogram { sum, .. } => *sum,
        }
    }
}

trait Number: Copy + Send + Sync + std::fmt::Debug + 'static {
    fn to_f64(self) -> f64;
}

impl Number for u64 {
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Number for i64 {
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Number for f64 {
    fn to_f64(self) -> f64 {
        self
    }
}

/// Every data point of a collection, in collection order.
pub fn metric_points(metrics: &ResourceMetrics) -> Vec<MetricPoint> {
    let mut points = Vec::new();
    for metric in metrics.scope_metrics.iter().flat_map(|scope| &scope.metrics) {
        let _ = push_points::<u64>(metric, &mut points)
            || push_points::<i64>(metric, &mut points)
            || push_points::<f64>(metric, &mut points);
    }
    points
}

fn push_points<T: Number>(metric: &Metric, out: &mut Vec<MetricPoint>) -> bool {
    let data: &dyn Any = metric.data.as_any();
    let point = |attributes: &[KeyValue], value: PointValue| MetricPoint {
        name: metric.name.to_string(),
        unit: metric.unit.to_string(),
        attributes: attributes.to_vec(),
        value,
    };

    if let Some(sum) = data.downcast_ref::<Sum<T>>() {
        out.extend(sum.data_points.iter().map(|dp| {
            point(
                &dp.attributes,
                PointValue::Sum {
                    value: dp.value.to_f64(),
                    monotonic: sum.is_monotonic,
                },
            )
        }));
        return true;
    }
    if let Some(gauge) = data.downcast_ref::<Gauge<T>>() {
        out.extend(
            gauge
                .data_points
                .iter()
                .map(|dp| point(&dp.attributes, PointValue::Gauge(dp.value.to_f64()))),
        );
        return true;
    }
    if let Some(histogram) = data.downcast_ref::<Histogram<T>>() {
        out.extend(histogram.data_points.iter().map(|dp| {
            point(
                &dp.attributes,
                PointValue::Histogram {
                    count: dp.count,
                    sum: dp.sum.to_f64(),
                    bounds: dp.bounds.clone(),
                    bucket_counts: dp.bucket_counts.clone(),
                },
            )
        }));
        return true;
    }
    false
}

/// Keep the data points of `metric` whose attributes satisfy `keep`.
///
/// Returns the number of points left. Unknown aggregations are kept whole.
pub(crate) fn retain_points(metric: &mut Metric, keep: &dyn Fn(&[KeyValue]) -> bool) -> usize {
    let data: &mut dyn Any = Aggregation::as_mut(&mut *metric.data);
    retain_typed::<u64>(data, keep)
        .or_else(|| retain_typed::<i64>(data, keep))
        .or_else(|| retain_typed::<f64>(data, keep))
        .unwrap_or(1)
}

fn retain_typed<T: Number>(data: &mut dyn Any, keep: &dyn Fn(&[KeyValue]) -> bool) -> Option<usize> {
    if let Some(sum) = data.downcast_mut::<Sum<T>>() {
        sum.data_points.retain(|dp| keep(&dp.attributes));
        return Some(sum.data_points.len());
    }
    if let Some(gauge) = data.downcast_mut::<Gauge<T>>() {
        gauge.data_points.retain(|dp| keep(&dp.attributes));
        return Some(gauge.data_points.len());
    }
    if let Some(histogram) = data.downcast_mut::<Histogram<T>>() {
        histogram.data_points.retain(|dp| keep(&dp.attributes));
        return Some(histogram.data_points.len());
    }
    None
}
