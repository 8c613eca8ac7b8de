//! Telemetry lifecycle.
//!
//! # Responsibilities
//! - Build the OpenTelemetry tracer and meter providers once at startup
//! - Wire exporters behind exclusion filters, a batch span processor and a
//!   periodic metric reader
//! - Flush and shut everything down explicitly at the end
//!
//! # Design Decisions
//! - No global provider registration: `Telemetry` is passed to whoever needs it
//! - Export runs on the SDK's own threads (batch processor, periodic reader),
//!   never on a request task
//! - Without an exporter a pipeline still works, it just exports nothing

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::error::OTelSdkError;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfig, BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracer, SdkTracerProvider,
    SpanExporter, TracerProviderBuilder,
};
use opentelemetry_sdk::Resource;
use thiserror::Error;

use crate::config::{ServerInstrumentsConfig, ServiceConfig};
use crate::observability::exclusion::{ExclusionError, ExclusionFilter, ExclusionRules};
use crate::observability::export::LogSpanExporter;
use crate::observability::meter::{ServerMetrics, ServerMetricsConfig};
use crate::observability::prometheus::{install_prometheus, PrometheusExporter};
use crate::observability::request::ServerTelemetry;
use crate::observability::resource::service_resource;
use crate::observability::trace::ratio_sampler;

/// Instrumentation scope name for everything this crate emits.
pub const SCOPE: &str = "service-kit";

/// Error type for telemetry setup and shutdown.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Exclusion(#[from] ExclusionError),

    #[error("telemetry pipeline error: {0}")]
    Sdk(#[from] OTelSdkError),

    #[error("invalid metrics exporter address '{0}'")]
    InvalidAddress(String),

    #[error("failed to install Prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),

    #[error("telemetry shutdown task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Span batch export settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanBatch {
    pub max_queue_size: usize,
    pub max_batch_size: usize,
    pub scheduled_delay: Duration,
}

impl Default for SpanBatch {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
        }
    }
}

impl SpanBatch {
    fn config(&self) -> BatchConfig {
        BatchConfigBuilder::default()
            .with_max_queue_size(self.max_queue_size)
            .with_max_export_batch_size(self.max_batch_size)
            .with_scheduled_delay(self.scheduled_delay)
            .build()
    }
}

/// Tracer and meter providers plus the handles taken from them.
#[derive(Debug, Clone)]
pub struct Telemetry {
    resource: Resource,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    tracer: SdkTracer,
    meter: Meter,
}

impl Telemetry {
    pub fn builder(resource: Resource) -> TelemetryBuilder {
        TelemetryBuilder {
            resource,
            sampler: Sampler::AlwaysOn,
            span_exporter: None,
            metric_exporter: None,
            span_exclusions: ExclusionRules::default(),
            metric_exclusions: ExclusionRules::default(),
            batch: None,
            export_interval: Duration::from_secs(10),
        }
    }

    /// Telemetry that records in-process values and exports nothing.
    pub fn noop() -> Self {
        Self::builder(Resource::builder_empty().build()).build()
    }

    /// Build from configuration. Installs the Prometheus recorder when an
    /// exporter address is configured, so it must run inside the runtime.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, TelemetryError> {
        let app = &config.app;
        let resource = service_resource(app);

        let telemetry = &config.telemetry;
        let mut builder = Telemetry::builder(resource.clone());

        if telemetry.batch.enabled {
            builder = builder.with_batch(SpanBatch {
                max_queue_size: telemetry.batch.max_queue_size,
                max_batch_size: telemetry.batch.max_batch_size,
                scheduled_delay: Duration::from_millis(telemetry.batch.scheduled_delay_ms),
            });
        }

        let meter = &telemetry.meter;
        if meter.enabled {
            builder = builder
                .with_export_interval(Duration::from_millis(meter.export_interval_ms))
                .with_metric_exclusions(ExclusionRules::from_config(&meter.exclusions)?);
            if !meter.exporter_address.is_empty() {
                let addr: SocketAddr = meter
                    .exporter_address
                    .parse()
                    .map_err(|_| TelemetryError::InvalidAddress(meter.exporter_address.clone()))?;
                install_prometheus(addr, &resource)?;
                builder = builder.with_metric_exporter(PrometheusExporter);
            }
        }

        let trace = &telemetry.trace;
        if trace.enabled {
            builder = builder
                .with_sampler(ratio_sampler(trace.sampling_rate))
                .with_span_exclusions(ExclusionRules::from_config(&trace.exclusions)?);
            if trace.log_spans {
                builder = builder.with_span_exporter(LogSpanExporter);
            }
        } else {
            builder = builder.with_sampler(Sampler::AlwaysOff);
        }

        let built = builder.build();
        tracing::info!(
            service = %app.service_name,
            env = %app.env,
            metrics = meter.enabled,
            traces = trace.enabled,
            metric_exclusions = meter.exclusions.len(),
            span_exclusions = trace.exclusions.len(),
            "Telemetry initialized"
        );
        Ok(built)
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    /// Tracer and server instruments for one transport.
    pub fn server(&self, config: &ServerMetricsConfig) -> ServerTelemetry {
        ServerTelemetry::new(self.tracer.clone(), ServerMetrics::new(&self.meter, config))
    }

    /// Export everything recorded so far. Blocks until the exporters return.
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        let spans = self.tracer_provider.force_flush();
        let metrics = self.meter_provider.force_flush();
        spans?;
        metrics?;
        Ok(())
    }

    /// Flush pending data and shut the exporters down.
    pub async fn shutdown(&self) -> Result<(), TelemetryError> {
        let tracer_provider = self.tracer_provider.clone();
        let meter_provider = self.meter_provider.clone();
        let (spans, metrics) = tokio::task::spawn_blocking(move || {
            (tracer_provider.shutdown(), meter_provider.shutdown())
        })
        .await?;

        if let Err(e) = &metrics {
            tracing::warn!(error = %e, "metric pipeline shutdown failed");
        }
        if let Err(e) = &spans {
            tracing::warn!(error = %e, "span pipeline shutdown failed");
        }
        metrics?;
        spans?;
        tracing::info!("Telemetry shut down");
        Ok(())
    }
}

/// Apply per-instrument switches to a base server metrics configuration.
pub fn server_metrics_config(
    base: ServerMetricsConfig,
    switches: &ServerInstrumentsConfig,
) -> ServerMetricsConfig {
    ServerMetricsConfig {
        active_requests: base.active_requests && switches.active_requests,
        request_count: base.request_count && switches.request_count,
        request_duration: base.request_duration && switches.request_duration,
        request_size: base.request_size && switches.request_size,
        response_size: base.response_size && switches.response_size,
        ..base
    }
}

type SpanInstaller =
    Box<dyn FnOnce(TracerProviderBuilder, Option<Arc<ExclusionRules>>, Option<SpanBatch>) -> TracerProviderBuilder>;
type MetricInstaller =
    Box<dyn FnOnce(MeterProviderBuilder, Option<Arc<ExclusionRules>>, Duration) -> MeterProviderBuilder>;

/// Step-by-step construction of [`Telemetry`].
///
/// Exclusions, batching and the export interval apply to the exporters no
/// matter in which order the `with_*` calls are made.
pub struct TelemetryBuilder {
    resource: Resource,
    sampler: Sampler,
    span_exporter: Option<SpanInstaller>,
    metric_exporter: Option<MetricInstaller>,
    span_exclusions: ExclusionRules,
    metric_exclusions: ExclusionRules,
    batch: Option<SpanBatch>,
    export_interval: Duration,
}

impl TelemetryBuilder {
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_span_exporter<E: SpanExporter + 'static>(mut self, exporter: E) -> Self {
        self.span_exporter = Some(Box::new(
            move |builder: TracerProviderBuilder,
                  rules: Option<Arc<ExclusionRules>>,
                  batch: Option<SpanBatch>| match rules {
                Some(rules) => install_spans(builder, ExclusionFilter::new(rules, exporter), batch),
                None => install_spans(builder, exporter, batch),
            },
        ));
        self
    }

    pub fn with_metric_exporter<E: PushMetricExporter>(mut self, exporter: E) -> Self {
        self.metric_exporter = Some(Box::new(
            move |builder: MeterProviderBuilder,
                  rules: Option<Arc<ExclusionRules>>,
                  interval: Duration| match rules {
                Some(rules) => install_metrics(builder, ExclusionFilter::new(rules, exporter), interval),
                None => install_metrics(builder, exporter, interval),
            },
        ));
        self
    }

    pub fn with_metric_exclusions(mut self, rules: ExclusionRules) -> Self {
        self.metric_exclusions = rules;
        self
    }

    pub fn with_span_exclusions(mut self, rules: ExclusionRules) -> Self {
        self.span_exclusions = rules;
        self
    }

    /// Export spans from a background thread in batches. Without this, spans
    /// are exported as they end.
    pub fn with_batch(mut self, batch: SpanBatch) -> Self {
        self.batch = Some(batch);
        self
    }

    /// How often the periodic reader collects and exports metrics.
    pub fn with_export_interval(mut self, interval: Duration) -> Self {
        self.export_interval = interval;
        self
    }

    pub fn build(self) -> Telemetry {
        let mut tracer_builder = SdkTracerProvider::builder()
            .with_sampler(self.sampler)
            .with_resource(self.resource.clone());
        if let Some(install) = self.span_exporter {
            tracer_builder = install(tracer_builder, non_empty(self.span_exclusions), self.batch);
        }
        let tracer_provider = tracer_builder.build();

        let mut meter_builder = SdkMeterProvider::builder().with_resource(self.resource.clone());
        if let Some(install) = self.metric_exporter {
            meter_builder = install(
                meter_builder,
                non_empty(self.metric_exclusions),
                self.export_interval,
            );
        }
        let meter_provider = meter_builder.build();

        Telemetry {
            tracer: tracer_provider.tracer(SCOPE),
            meter: meter_provider.meter(SCOPE),
            resource: self.resource,
            tracer_provider,
            meter_provider,
        }
    }
}

fn non_empty(rules: ExclusionRules) -> Option<Arc<ExclusionRules>> {
    (!rules.is_empty()).then(|| Arc::new(rules))
}

fn install_spans<E: SpanExporter + 'static>(
    builder: TracerProviderBuilder,
    exporter: E,
    batch: Option<SpanBatch>,
) -> TracerProviderBuilder {
    match batch {
        Some(batch) => builder.with_span_processor(
            BatchSpanProcessor::builder(exporter)
                .with_batch_config(batch.config())
                .build(),
        ),
        None => builder.with_simple_exporter(exporter),
    }
}

fn install_metrics<E: PushMetricExporter>(
    builder: MeterProviderBuilder,
    exporter: E,
    interval: Duration,
) -> MeterProviderBuilder {
    builder.with_reader(PeriodicReader::builder(exporter).with_interval(interval).build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::KeyValue;
    use crate::observability::export::metric_points;
    use crate::observability::resource::named_resource;
    use opentelemetry::trace::{Span as _, Tracer as _};
    use opentelemetry_sdk::metrics::InMemoryMetricExporter;
    use opentelemetry_sdk::error::OTelSdkResult;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};

    /// Unlike the in-memory exporter, keeps its spans after shutdown.
    #[derive(Debug, Clone, Default)]
    struct Retained(InMemorySpanExporter);

    impl SpanExporter for Retained {
        async fn export(&self, batch: Vec<SpanData>) -> OTelSdkResult {
            self.0.export(batch).await
        }
    }

    #[tokio::test]
    async fn test_batched_spans_flush_on_shutdown() {
        let exporter = Retained::default();
        let spans = exporter.0.clone();
        let telemetry = Telemetry::builder(named_resource("svc"))
            .with_span_exporter(exporter)
            .with_batch(SpanBatch {
                scheduled_delay: Duration::from_secs(3600),
                ..SpanBatch::default()
            })
            .build();

        telemetry.tracer().start("job").end();
        assert!(spans.get_finished_spans().unwrap().is_empty());

        telemetry.shutdown().await.unwrap();
        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].name, "job");
    }

    #[test]
    fn test_exclusions_apply_regardless_of_call_order() {
        let metrics = InMemoryMetricExporter::default();
        let mut rules = std::collections::BTreeMap::new();
        rules.insert("job.kind".to_string(), "^internal$".to_string());
        let telemetry = Telemetry::builder(named_resource("svc"))
            .with_metric_exporter(metrics.clone())
            .with_metric_exclusions(ExclusionRules::from_config(&rules).unwrap())
            .build();

        let counter = telemetry.meter().u64_counter("jobs").build();
        counter.add(1, &[KeyValue::new("job.kind", "internal")]);
        counter.add(1, &[KeyValue::new("job.kind", "user")]);
        telemetry.force_flush().unwrap();

        let collected = metrics.get_finished_metrics().unwrap();
        let points = metric_points(collected.last().unwrap());
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].attribute("job.kind").unwrap().to_string(), "user");
    }

    #[test]
    fn test_resource_reaches_exporters() {
        let spans = InMemorySpanExporter::default();
        let telemetry = Telemetry::builder(named_resource("svc"))
            .with_span_exporter(spans.clone())
            .build();
        telemetry.tracer().start("job").end();

        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(telemetry.resource().len(), 1);
    }

    #[test]
    fn test_switches_only_disable() {
        let switches = ServerInstrumentsConfig {
            response_size: false,
            ..ServerInstrumentsConfig::default()
        };
        let config = server_metrics_config(ServerMetricsConfig::http(), &switches);
        assert!(!config.response_size);
        assert!(config.request_size);

        let rpc = server_metrics_config(ServerMetricsConfig::rpc(), &ServerInstrumentsConfig::default());
        assert!(!rpc.request_size);
    }

    #[tokio::test]
    async fn test_from_default_config() {
        let telemetry = Telemetry::from_config(&ServiceConfig::default()).unwrap();
        assert_eq!(telemetry.resource().len(), 4);
        telemetry.shutdown().await.unwrap();
    }
}
