//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the Prometheus recorder and its scrape endpoint
//! - Mirror each periodic SDK collection into the `metrics` facade
//!
//! # Design Decisions
//! - Resource attributes become global labels, data point attributes become
//!   per-series labels
//! - The SDK aggregates; this exporter only copies cumulative values, so
//!   histograms are written as `.count`, `.sum` and cumulative `.bucket{le}`
//!   series rather than re-recorded observations

use std::net::SocketAddr;

use metrics::Label;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::Temporality;
use opentelemetry_sdk::Resource;

use crate::observability::export::{metric_points, MetricPoint, PointValue};

/// Install the global Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn install_prometheus(addr: SocketAddr, resource: &Resource) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new().with_http_listener(addr);
    for (key, value) in resource.iter() {
        builder = builder.add_global_label(key.to_string(), value.to_string());
    }

    builder.install()?;
    tracing::info!(address = %addr, "Prometheus metrics exporter started");
    Ok(())
}

/// Copies collected data points to whatever recorder is installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusExporter;

impl PrometheusExporter {
    fn write(point: MetricPoint) {
        let labels: Vec<Label> = point
            .attributes
            .iter()
            .map(|kv| Label::new(kv.key.to_string(), kv.value.to_string()))
            .collect();
        let name = point.name;

        match point.value {
            PointValue::Sum { value, monotonic: true } => {
                metrics::counter!(name, labels).absolute(value as u64)
            }
            PointValue::Sum { value, .. } | PointValue::Gauge(value) => {
                metrics::gauge!(name, labels).set(value)
            }
            PointValue::Histogram {
                count,
                sum,
                bounds,
                bucket_counts,
            } => {
                metrics::counter!(format!("{name}.count"), labels.clone()).absolute(count);
                metrics::gauge!(format!("{name}.sum"), labels.clone()).set(sum);

                let bucket = format!("{name}.bucket");
                let mut cumulative = 0;
                let upper = bounds
                    .iter()
                    .map(|b| b.to_string())
                    .chain(std::iter::once("+Inf".to_string()));
                for (le, n) in upper.zip(bucket_counts) {
                    cumulative += n;
                    let mut labels = labels.clone();
                    labels.push(Label::new("le", le));
                    metrics::counter!(bucket.clone(), labels).absolute(cumulative);
                }
            }
        }
    }
}

impl PushMetricExporter for PrometheusExporter {
    async fn export(&self, metrics: &mut ResourceMetrics) -> OTelSdkResult {
        for point in metric_points(metrics) {
            Self::write(point);
        }
        Ok(())
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown(&self) -> OTelSdkResult {
        Ok(())
    }

    fn temporality(&self) -> Temporality {
        Temporality::Cumulative
    }
}
