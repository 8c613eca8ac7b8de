//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sampling rate in [0, 1])
//! - Check that addresses parse and exclusion patterns compile
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::BTreeMap;
use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Valid values for `*.access_log_level`.
pub const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.app.service_name.trim().is_empty() {
        errors.push(ValidationError::new("app.service_name", "must not be empty"));
    }

    if EnvFilter::try_new(&config.log.level).is_err() {
        errors.push(ValidationError::new(
            "log.level",
            format!("invalid filter directive '{}'", config.log.level),
        ));
    }

    let http = &config.http;
    if http.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "http.bind_address",
            format!("'{}' is not a socket address", http.bind_address),
        ));
    }
    if http.request_timeout_secs == 0 {
        errors.push(ValidationError::new("http.request_timeout_secs", "must be > 0"));
    }
    check_level(&mut errors, "http.access_log_level", &http.access_log_level);
    check_level(&mut errors, "rpc.access_log_level", &config.rpc.access_log_level);

    let meter = &config.telemetry.meter;
    if !meter.exporter_address.is_empty() && meter.exporter_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "telemetry.meter.exporter_address",
            format!("'{}' is not a socket address", meter.exporter_address),
        ));
    }
    if meter.export_interval_ms == 0 {
        errors.push(ValidationError::new("telemetry.meter.export_interval_ms", "must be > 0"));
    }
    check_patterns(&mut errors, "telemetry.meter.exclusions", &meter.exclusions);

    let trace = &config.telemetry.trace;
    if !(0.0..=1.0).contains(&trace.sampling_rate) {
        errors.push(ValidationError::new(
            "telemetry.trace.sampling_rate",
            format!("{} is outside [0.0, 1.0]", trace.sampling_rate),
        ));
    }
    check_patterns(&mut errors, "telemetry.trace.exclusions", &trace.exclusions);

    let batch = &config.telemetry.batch;
    if batch.max_queue_size == 0 {
        errors.push(ValidationError::new("telemetry.batch.max_queue_size", "must be > 0"));
    }
    if batch.max_batch_size == 0 || batch.max_batch_size > batch.max_queue_size {
        errors.push(ValidationError::new(
            "telemetry.batch.max_batch_size",
            "must be > 0 and <= max_queue_size",
        ));
    }
    if batch.scheduled_delay_ms == 0 {
        errors.push(ValidationError::new("telemetry.batch.scheduled_delay_ms", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_level(errors: &mut Vec<ValidationError>, field: &str, level: &str) {
    if !LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            field,
            format!("unknown level '{}', expected one of {}", level, LEVELS.join(", ")),
        ));
    }
}

fn check_patterns(errors: &mut Vec<ValidationError>, field: &str, map: &BTreeMap<String, String>) {
    for (key, pattern) in map {
        if let Err(e) = regex::Regex::new(pattern) {
            errors.push(ValidationError::new(format!("{}.{}", field, key), e.to_string()));
        }
    }
}
