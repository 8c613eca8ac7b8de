//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service identity, attached to every telemetry record.
    pub app: AppConfig,

    /// Log level and output format.
    pub log: LogConfig,

    /// HTTP server settings.
    pub http: HttpConfig,

    /// RPC interceptor settings.
    pub rpc: RpcConfig,

    /// Metrics and traces.
    pub telemetry: TelemetryConfig,
}

/// Service identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment (e.g., "local", "staging", "prod").
    pub env: String,
    pub service_name: String,
    pub service_namespace: String,
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: "local".to_string(),
            service_name: "unknown-service-name".to_string(),
            service_namespace: "unknown-service-namespace".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive. `RUST_LOG` overrides it.
    pub level: String,

    /// Include source file and line.
    pub add_source: bool,

    /// One JSON object per line.
    pub json: bool,

    /// ANSI colors for human-readable output.
    pub pretty: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            add_source: false,
            json: false,
            pretty: false,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Whole-request deadline.
    pub request_timeout_secs: u64,

    /// How long to wait for in-flight requests on shutdown.
    pub shutdown_timeout_secs: u64,

    /// Emit `incoming http req` / `outgoing http resp` events.
    pub access_log: bool,

    /// Level of the access log events.
    pub access_log_level: String,

    /// Exact paths excluded from telemetry and access logs.
    pub skip_paths: Vec<String>,

    /// Add uri, host, peer and user agent to the request logger.
    pub log_request_details: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            shutdown_timeout_secs: 10,
            access_log: false,
            access_log_level: "debug".to_string(),
            skip_paths: vec!["/healthz".to_string()],
            log_request_details: true,
        }
    }
}

/// RPC interceptor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    pub access_log: bool,
    pub access_log_level: String,

    /// Full method names excluded from telemetry and access logs.
    pub skip_methods: Vec<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            access_log: false,
            access_log_level: "debug".to_string(),
            skip_methods: vec!["/grpc.health.v1.Health/Check".to_string()],
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub meter: MeterConfig,
    pub trace: TraceConfig,
    pub batch: BatchSettings,
}

/// Metric pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MeterConfig {
    pub enabled: bool,

    /// Prometheus scrape listener. Empty keeps measurements in-process only.
    pub exporter_address: String,

    /// How often aggregated metrics are collected and exported.
    pub export_interval_ms: u64,

    /// Attribute key → regex. Matching data points are not exported.
    pub exclusions: BTreeMap<String, String>,

    /// Per-instrument switches for the server metrics.
    pub server: ServerInstrumentsConfig,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exporter_address: String::new(),
            export_interval_ms: 10_000,
            exclusions: BTreeMap::new(),
            server: ServerInstrumentsConfig::default(),
        }
    }
}

/// Server instrument switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerInstrumentsConfig {
    pub active_requests: bool,
    pub request_count: bool,
    pub request_duration: bool,
    pub request_size: bool,
    pub response_size: bool,
}

impl Default for ServerInstrumentsConfig {
    fn default() -> Self {
        Self {
            active_requests: true,
            request_count: true,
            request_duration: true,
            request_size: true,
            response_size: true,
        }
    }
}

/// Trace pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,

    /// Fraction of root traces kept, 0.0 to 1.0.
    pub sampling_rate: f64,

    /// Write finished spans to the log at debug level.
    pub log_spans: bool,

    /// Attribute key → regex. Matching spans are not exported.
    pub exclusions: BTreeMap<String, String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling_rate: 1.0,
            log_spans: false,
            exclusions: BTreeMap::new(),
        }
    }
}

/// Span batch export settings. When disabled, spans are exported as they end.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchSettings {
    pub enabled: bool,
    pub max_queue_size: usize,
    pub max_batch_size: usize,
    pub scheduled_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queue_size: 2048,
            max_batch_size: 512,
            scheduled_delay_ms: 5000,
        }
    }
}
