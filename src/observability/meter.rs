//! Server-side request instruments shared by the HTTP and RPC stacks.
//!
//! # Data Flow
//! ```text
//! opentelemetry Meter (instrument cache, one instrument per name)
//!     → ServerMetrics (the five per-request instruments)
//!     → SDK aggregation → periodic reader → [exclusion filter] → exporter
//! ```

use std::time::Duration;

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

use crate::context::KeyValue;

/// Request duration bucket boundaries, in milliseconds.
pub const DURATION_BUCKETS_MS: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0,
    7500.0, 10000.0,
];

/// Body size bucket boundaries, in bytes.
pub const SIZE_BUCKETS_BYTES: [f64; 10] = [
    0.0, 128.0, 512.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0,
];

/// Which server instruments exist and what they are called.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMetricsConfig {
    /// Name prefix, e.g. `http.server`.
    pub prefix: String,
    pub active_requests: bool,
    pub request_count: bool,
    pub request_duration: bool,
    pub request_size: bool,
    pub response_size: bool,
    pub duration_buckets: Vec<f64>,
}

impl ServerMetricsConfig {
    pub fn http() -> Self {
        Self {
            prefix: "http.server".to_string(),
            active_requests: true,
            request_count: true,
            request_duration: true,
            request_size: true,
            response_size: true,
            duration_buckets: DURATION_BUCKETS_MS.to_vec(),
        }
    }

    /// Message sizes are not observable through a unary interceptor, so the
    /// size instruments start disabled.
    pub fn rpc() -> Self {
        Self {
            prefix: "rpc.server".to_string(),
            request_size: false,
            response_size: false,
            ..Self::http()
        }
    }

    pub fn active_requests_name(&self) -> String {
        format!("{}.active_requests", self.prefix)
    }

    pub fn request_count_name(&self) -> String {
        format!("{}.request.count", self.prefix)
    }

    pub fn request_duration_name(&self) -> String {
        format!("{}.request.duration", self.prefix)
    }

    pub fn request_size_name(&self) -> String {
        format!("{}.request.body.size", self.prefix)
    }

    pub fn response_size_name(&self) -> String {
        format!("{}.response.body.size", self.prefix)
    }
}

/// The five server instruments. Disabled ones are `None`.
#[derive(Debug, Clone, Default)]
pub struct ServerMetrics {
    active_requests: Option<UpDownCounter<i64>>,
    request_count: Option<Counter<u64>>,
    request_duration: Option<Histogram<f64>>,
    request_size: Option<Histogram<f64>>,
    response_size: Option<Histogram<f64>>,
}

impl ServerMetrics {
    pub fn new(meter: &Meter, config: &ServerMetricsConfig) -> Self {
        let size = |name: String, description: &'static str| {
            meter
                .f64_histogram(name)
                .with_unit("By")
                .with_description(description)
                .with_boundaries(SIZE_BUCKETS_BYTES.to_vec())
                .build()
        };

        Self {
            active_requests: config.active_requests.then(|| {
                meter
                    .i64_up_down_counter(config.active_requests_name())
                    .with_unit("{request}")
                    .with_description("Number of requests in flight")
                    .build()
            }),
            request_count: config.request_count.then(|| {
                meter
                    .u64_counter(config.request_count_name())
                    .with_unit("{request}")
                    .with_description("Number of finished requests")
                    .build()
            }),
            request_duration: config.request_duration.then(|| {
                meter
                    .f64_histogram(config.request_duration_name())
                    .with_unit("ms")
                    .with_description("Time from request entry to handler completion")
                    .with_boundaries(config.duration_buckets.clone())
                    .build()
            }),
            request_size: config
                .request_size
                .then(|| size(config.request_size_name(), "Approximate request size")),
            response_size: config
                .response_size
                .then(|| size(config.response_size_name(), "Bytes written in the response body")),
        }
    }

    /// No instruments at all.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// +1 now, -1 when the guard drops.
    pub fn track_active(&self, attributes: Vec<KeyValue>) -> ActiveRequestGuard {
        if let Some(counter) = &self.active_requests {
            counter.add(1, &attributes);
        }
        ActiveRequestGuard {
            counter: self.active_requests.clone(),
            attributes,
        }
    }

    /// Record count, duration and request size for a finished request.
    pub fn record_completion(
        &self,
        attributes: &[KeyValue],
        duration: Duration,
        request_size: Option<u64>,
    ) {
        if let Some(count) = &self.request_count {
            count.add(1, attributes);
        }
        if let Some(histogram) = &self.request_duration {
            histogram.record(duration.as_secs_f64() * 1000.0, attributes);
        }
        if let (Some(histogram), Some(size)) = (&self.request_size, request_size) {
            histogram.record(size as f64, attributes);
        }
    }

    pub fn active_requests(&self) -> Option<&UpDownCounter<i64>> {
        self.active_requests.as_ref()
    }

    pub fn request_count(&self) -> Option<&Counter<u64>> {
        self.request_count.as_ref()
    }

    pub fn request_duration(&self) -> Option<&Histogram<f64>> {
        self.request_duration.as_ref()
    }

    pub fn request_size(&self) -> Option<&Histogram<f64>> {
        self.request_size.as_ref()
    }

    pub fn response_size(&self) -> Option<&Histogram<f64>> {
        self.response_size.as_ref()
    }
}

/// Keeps a request counted as in flight.
#[derive(Debug)]
pub struct ActiveRequestGuard {
    counter: Option<UpDownCounter<i64>>,
    attributes: Vec<KeyValue>,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        if let Some(counter) = &self.counter {
            counter.add(-1, &self.attributes);
        }
    }
}
