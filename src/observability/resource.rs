//! Process-level attributes attached to every exported span and metric.

use opentelemetry_sdk::Resource;

use crate::config::AppConfig;
use crate::context::KeyValue;

pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_NAMESPACE: &str = "service.namespace";
pub const SERVICE_VERSION: &str = "service.version";
pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";

/// Resource for the running service. Empty values are left out.
///
/// Built without the SDK's environment detectors, so the attribute set is
/// exactly what the configuration says.
pub fn service_resource(app: &AppConfig) -> Resource {
    let attributes = [
        (SERVICE_NAME, &app.service_name),
        (SERVICE_NAMESPACE, &app.service_namespace),
        (SERVICE_VERSION, &app.version),
        (DEPLOYMENT_ENVIRONMENT, &app.env),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(key, value)| KeyValue::new(key, value.clone()));

    Resource::builder_empty().with_attributes(attributes).build()
}

/// Resource with only a service name, for tests and embedded use.
pub fn named_resource(service_name: impl Into<String>) -> Resource {
    Resource::builder_empty()
        .with_attributes([KeyValue::new(SERVICE_NAME, service_name.into())])
        .build()
}
