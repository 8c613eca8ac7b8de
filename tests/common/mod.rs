//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::response::Response;
use axum::Router;
use parking_lot::Mutex;
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;

use opentelemetry_sdk::metrics::InMemoryMetricExporter;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
use opentelemetry_sdk::Resource;

use service_kit::config::HttpConfig;
use service_kit::context::KeyValue;
use service_kit::http::{HttpStack, RpcStatusFallback};
use service_kit::http::error::HttpErrorTranslator;
use service_kit::observability::export::{metric_points, MetricPoint};
use service_kit::observability::meter::ServerMetricsConfig;
use service_kit::observability::request::ServerTelemetry;
use service_kit::observability::{Telemetry, TelemetryBuilder};

/// In-memory log sink for a scoped JSON subscriber.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Parsed JSON lines.
    pub fn events(&self) -> Vec<serde_json::Value> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Install a JSON subscriber writing here for the current thread.
    pub fn install(&self, filter: &str) -> tracing::subscriber::DefaultGuard {
        let subscriber = service_kit::observability::logging::json_subscriber(filter, self.clone())
            .expect("valid filter");
        tracing::subscriber::set_default(subscriber)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Telemetry exporting into memory, without batching.
pub struct TestTelemetry {
    pub telemetry: Telemetry,
    pub metrics: InMemoryMetricExporter,
    pub spans: InMemorySpanExporter,
}

impl TestTelemetry {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    /// Like `new`, with extra builder settings (exclusions, sampler).
    pub fn with(configure: impl FnOnce(TelemetryBuilder) -> TelemetryBuilder) -> Self {
        let metrics = InMemoryMetricExporter::default();
        let spans = InMemorySpanExporter::default();
        let builder = Telemetry::builder(resource())
            .with_metric_exporter(metrics.clone())
            .with_span_exporter(spans.clone());
        Self {
            telemetry: configure(builder).build(),
            metrics,
            spans,
        }
    }

    pub fn http(&self) -> ServerTelemetry {
        self.telemetry.server(&ServerMetricsConfig::http())
    }

    pub fn rpc(&self) -> ServerTelemetry {
        self.telemetry.server(&ServerMetricsConfig::rpc())
    }

    /// Finished spans, in end order.
    pub fn spans(&self) -> Vec<SpanData> {
        self.telemetry.force_flush().expect("flush");
        self.spans.get_finished_spans().expect("spans")
    }

    /// Every data point of a fresh collection.
    pub fn points(&self) -> Vec<MetricPoint> {
        self.telemetry.force_flush().expect("flush");
        self.metrics
            .get_finished_metrics()
            .expect("metrics")
            .last()
            .map(metric_points)
            .unwrap_or_default()
    }

    /// Data points of the metric `name`.
    pub fn metric(&self, name: &str) -> Vec<MetricPoint> {
        self.points().into_iter().filter(|p| p.name == name).collect()
    }

    /// The single data point of the metric `name`.
    pub fn point(&self, name: &str) -> MetricPoint {
        let mut points = self.metric(name);
        assert_eq!(points.len(), 1, "data points of {name}: {points:?}");
        points.remove(0)
    }
}

pub fn resource() -> Resource {
    Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", "test-service"),
            KeyValue::new("deployment.environment", "test"),
        ])
        .build()
}

/// Stack with default HTTP settings and the RPC status fallback.
pub fn stack(server: ServerTelemetry, config: HttpConfig) -> HttpStack {
    HttpStack::new(config, server)
        .with_translator(HttpErrorTranslator::new().with_fallback(RpcStatusFallback))
}

pub async fn send(router: Router, request: Request) -> Response {
    router.oneshot(request).await.expect("infallible")
}

pub fn get_req(uri: &str) -> Request {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}
