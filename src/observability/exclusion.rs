//! Regex-based suppression of telemetry before export.
//!
//! # Responsibilities
//! - Compile `key → pattern` rules once at startup
//! - Drop a whole span, or a whole metric data point, when any rule matches any
//!   of its attributes
//! - Drop everything when a rule matches a resource attribute
//! - Forward the rest to the wrapped exporter unchanged
//!
//! # Design Decisions
//! - Wraps the exporter, not the producers: adding a rule touches no
//!   instrumentation code
//! - No partial redaction
//! - Metrics are aggregated before export, so the unit of exclusion for
//!   metrics is one attribute set of one instrument

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::Temporality;
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use opentelemetry_sdk::Resource;
use regex::Regex;
use thiserror::Error;

use crate::context::KeyValue;
use crate::observability::export::retain_points;

#[derive(Debug, Error)]
#[error("invalid exclusion pattern for key '{key}': {source}")]
pub struct ExclusionError {
    pub key: String,
    #[source]
    pub source: regex::Error,
}

/// One `(attribute key, value pattern)` pair.
#[derive(Debug, Clone)]
pub struct ExclusionRule {
    key: String,
    pattern: Regex,
}

impl ExclusionRule {
    pub fn new(key: impl Into<String>, pattern: &str) -> Result<Self, ExclusionError> {
        let key = key.into();
        let pattern = Regex::new(pattern).map_err(|source| ExclusionError {
            key: key.clone(),
            source,
        })?;
        Ok(Self { key, pattern })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn matches(&self, key: &str, value: &opentelemetry::Value) -> bool {
        key == self.key && self.pattern.is_match(&value.to_string())
    }
}

/// Immutable rule set. Rules are OR-ed.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    rules: Vec<ExclusionRule>,
}

impl ExclusionRules {
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    /// Compile a `key → pattern` map. Fails on the first invalid pattern.
    pub fn from_config(map: &BTreeMap<String, String>) -> Result<Self, ExclusionError> {
        let rules = map
            .iter()
            .map(|(key, pattern)| ExclusionRule::new(key.clone(), pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if a record carrying `attributes` must be dropped.
    pub fn excludes(&self, attributes: &[KeyValue]) -> bool {
        attributes.iter().any(|kv| {
            self.rules
                .iter()
                .any(|rule| rule.matches(kv.key.as_str(), &kv.value))
        })
    }

    /// True if everything emitted under `resource` must be dropped.
    pub fn excludes_resource(&self, resource: &Resource) -> bool {
        resource.iter().any(|(key, value)| {
            self.rules
                .iter()
                .any(|rule| rule.matches(key.as_str(), value))
        })
    }
}

/// Exporter decorator that drops excluded spans and data points.
///
/// Implements both the span and the metric exporter capability of whatever it
/// wraps.
pub struct ExclusionFilter<E> {
    rules: Arc<ExclusionRules>,
    resource_excluded: bool,
    inner: E,
}

impl<E> ExclusionFilter<E> {
    pub fn new(rules: Arc<ExclusionRules>, inner: E) -> Self {
        Self {
            rules,
            resource_excluded: false,
            inner,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: fmt::Debug> fmt::Debug for ExclusionFilter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusionFilter")
            .field("rules", &self.rules.len())
            .field("resource_excluded", &self.resource_excluded)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<E: SpanExporter> SpanExporter for ExclusionFilter<E> {
    async fn export(&self, mut batch: Vec<SpanData>) -> OTelSdkResult {
        if self.resource_excluded {
            return Ok(());
        }

        let before = batch.len();
        batch.retain(|span| !self.rules.excludes(&span.attributes));
        let dropped = before - batch.len();
        if dropped > 0 {
            tracing::trace!(dropped, "spans excluded");
        }

        if batch.is_empty() {
            return Ok(());
        }
        self.inner.export(batch).await
    }

    fn shutdown(&mut self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    fn force_flush(&mut self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.resource_excluded = self.rules.excludes_resource(resource);
        self.inner.set_resource(resource);
    }
}

impl<E: PushMetricExporter> PushMetricExporter for ExclusionFilter<E> {
    async fn export(&self, metrics: &mut ResourceMetrics) -> OTelSdkResult {
        if self.rules.excludes_resource(&metrics.resource) {
            metrics.scope_metrics.clear();
            return Ok(());
        }

        let rules = &self.rules;
        let keep = |attributes: &[KeyValue]| !rules.excludes(attributes);
        for scope in &mut metrics.scope_metrics {
            scope
                .metrics
                .retain_mut(|metric| retain_points(metric, &keep) > 0);
        }
        metrics.scope_metrics.retain(|scope| !scope.metrics.is_empty());

        if metrics.scope_metrics.is_empty() {
            return Ok(());
        }
        self.inner.export(metrics).await
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    fn temporality(&self) -> Temporality {
        self.inner.temporality()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::resource::{named_resource, DEPLOYMENT_ENVIRONMENT, SERVICE_NAME};

    fn rules(pairs: &[(&str, &str)]) -> ExclusionRules {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ExclusionRules::from_config(&map).unwrap()
    }

    #[test]
    fn test_no_rules_exclude_nothing() {
        let rules = ExclusionRules::default();
        assert!(rules.is_empty());
        assert!(!rules.excludes(&[KeyValue::new("env", "staging")]));
        assert!(!rules.excludes_resource(&named_resource("users")));
    }

    #[test]
    fn test_resource_attributes_are_checked() {
        let rules = rules(&[(DEPLOYMENT_ENVIRONMENT, "^dev")]);
        let resource = Resource::builder_empty()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, "users"),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT, "dev-eu"),
            ])
            .build();
        assert!(rules.excludes_resource(&resource));
        assert!(!rules.excludes_resource(&named_resource("users")));
    }

    #[test]
    fn test_regex_matches_numeric_values() {
        let rules = rules(&[("http.response.status_code", "^4\\d\\d$")]);
        assert!(rules.excludes(&[KeyValue::new("http.response.status_code", 404i64)]));
        assert!(!rules.excludes(&[KeyValue::new("http.response.status_code", 200i64)]));
    }

    #[test]
    fn test_env_rule_drops_only_matching_value() {
        let rules = rules(&[("env", "^staging$")]);
        assert!(rules.excludes(&[KeyValue::new("env", "staging")]));
        assert!(!rules.excludes(&[KeyValue::new("env", "prod")]));
    }

    #[test]
    fn test_key_must_match_exactly() {
        let rules = rules(&[("env", ".*")]);
        assert!(!rules.excludes(&[KeyValue::new("environment", "prod")]));
    }

    #[test]
    fn test_invalid_pattern_names_key() {
        let mut map = BTreeMap::new();
        map.insert("http.route".to_string(), "([".to_string());
        let err = ExclusionRules::from_config(&map).unwrap_err();
        assert_eq!(err.key, "http.route");
        assert!(err.to_string().contains("http.route"));
    }
}
