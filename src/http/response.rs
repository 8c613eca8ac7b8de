//! Response-side helpers.
//!
//! # Responsibilities
//! - Count the bytes of a streaming response body
//! - Record the response size once the body is finished or dropped
//!
//! # Design Decisions
//! - The body is never buffered; frames are counted as they pass

use axum::body::Body;
use http_body_util::BodyExt;
use opentelemetry::metrics::Histogram;

use crate::context::KeyValue;

struct SizeRecorder {
    histogram: Histogram<f64>,
    attributes: Vec<KeyValue>,
    written: u64,
}

impl Drop for SizeRecorder {
    fn drop(&mut self) {
        self.histogram
            .record(self.written as f64, &self.attributes);
    }
}

/// Wrap `body` so its size is recorded into `histogram` with `attributes`.
pub fn measure_body(body: Body, histogram: Histogram<f64>, attributes: Vec<KeyValue>) -> Body {
    let mut recorder = SizeRecorder {
        histogram,
        attributes,
        written: 0,
    };
    Body::new(body.map_frame(move |frame| {
        // Use the whole recorder so the closure owns it, not just `written`.
        let recorder = &mut recorder;
        if let Some(data) = frame.data_ref() {
            recorder.written += data.len() as u64;
        }
        frame
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::export::{metric_points, MetricPoint};
    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

    const NAME: &str = "http.server.response.body.size";

    struct Harness {
        provider: SdkMeterProvider,
        exporter: InMemoryMetricExporter,
    }

    impl Harness {
        fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();
            let provider = SdkMeterProvider::builder()
                .with_periodic_exporter(exporter.clone())
                .build();
            Self { provider, exporter }
        }

        fn histogram(&self) -> Histogram<f64> {
            self.provider.meter("test").f64_histogram(NAME).with_unit("By").build()
        }

        fn size_point(&self) -> Option<MetricPoint> {
            self.provider.force_flush().unwrap();
            let collected = self.exporter.get_finished_metrics().unwrap();
            collected
                .last()
                .map(metric_points)
                .unwrap_or_default()
                .into_iter()
                .find(|p| p.name == NAME)
        }
    }

    #[tokio::test]
    async fn test_size_recorded_after_streaming() {
        let harness = Harness::new();
        let body = measure_body(
            Body::from("hello world"),
            harness.histogram(),
            vec![KeyValue::new("http.response.status_code", 200i64)],
        );
        assert!(harness.size_point().is_none());

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello world");

        let point = harness.size_point().unwrap();
        assert_eq!(point.count(), 1.0);
        assert_eq!(point.sum(), 11.0);
        assert_eq!(
            point.attribute("http.response.status_code").unwrap().to_string(),
            "200"
        );
    }

    #[tokio::test]
    async fn test_dropped_body_still_recorded() {
        let harness = Harness::new();
        drop(measure_body(Body::from("abc"), harness.histogram(), vec![]));

        let point = harness.size_point().unwrap();
        assert_eq!(point.count(), 1.0);
        assert_eq!(point.sum(), 0.0);
    }
}
