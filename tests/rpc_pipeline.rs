//! End-to-end tests of the unary RPC interceptor.

use std::time::Duration;

use tonic::metadata::MetadataValue;
use tonic::{Code, Request, Status};

use service_kit::context::{KeyValue, Value};
use service_kit::errors::{Error, ErrorKind};
use opentelemetry::trace::{SpanId, Status as SpanStatus, TraceId};
use service_kit::rpc::{UnaryInterceptor, UnaryInterceptorConfig};

mod common;

use common::{LogCapture, TestTelemetry};

const GET_USER: &str = "/users.v1.Users/Get";

fn attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a Value> {
    attributes.iter().find(|kv| kv.key.as_str() == key).map(|kv| &kv.value)
}

fn interceptor(telemetry: &TestTelemetry) -> UnaryInterceptor {
    UnaryInterceptor::new(telemetry.rpc(), UnaryInterceptorConfig::default())
}

#[tokio::test]
async fn test_sentinel_maps_to_code() {
    let telemetry = TestTelemetry::new();
    let status = interceptor(&telemetry)
        .call(GET_USER, Request::new(123u64), |_ctx, id| async move {
            Err::<String, _>(ErrorKind::NotFound.wrap(format!("user {id}")))
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "user 123: not found");

    // A miss is not a server fault.
    let spans = telemetry.spans();
    assert_eq!(spans[0].name, GET_USER);
    assert_eq!(spans[0].status, SpanStatus::Ok);
    assert_eq!(
        attribute(&spans[0].attributes, "rpc.grpc.status_code"),
        Some(&Value::from(Code::NotFound as i64))
    );
}

#[tokio::test]
async fn test_status_passes_through() {
    let telemetry = TestTelemetry::new();
    let status = interceptor(&telemetry)
        .call(GET_USER, Request::new(()), |_ctx, _| async {
            Err::<(), _>(Status::resource_exhausted("slow down"))
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::ResourceExhausted);
    assert_eq!(status.message(), "slow down");
}

#[tokio::test]
async fn test_internal_error_is_hidden_and_logged() {
    let telemetry = TestTelemetry::new();
    let logs = LogCapture::default();
    let _guard = logs.install("debug");

    let status = interceptor(&telemetry)
        .call(GET_USER, Request::new(()), |_ctx, _| async {
            Err::<(), _>(Error::internal("connection refused by db-3"))
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "internal error");
    assert!(logs.contents().contains("connection refused by db-3"));
    assert!(matches!(telemetry.spans()[0].status, SpanStatus::Error { .. }));
}

#[tokio::test]
async fn test_panic_is_recovered() {
    let telemetry = TestTelemetry::new();
    let logs = LogCapture::default();
    let _guard = logs.install("debug");

    let status = interceptor(&telemetry)
        .call(GET_USER, Request::new(()), |_ctx, _| async {
            if true {
                panic!("boom");
            }
            Ok::<(), Error>(())
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    assert!(!status.message().contains("boom"));
    let output = logs.contents();
    assert!(output.contains("grpc handler panicked and recovered"));
    assert!(output.contains("\"err\":\"boom\""));
}

#[tokio::test]
async fn test_metrics_and_parent() {
    let telemetry = TestTelemetry::new();
    let server = telemetry.rpc();
    let interceptor = UnaryInterceptor::new(server.clone(), UnaryInterceptorConfig::default());

    let mut request = Request::new(2u32);
    let header: MetadataValue<_> = "00-00000000000000000000000000000abc-0000000000000def-01"
        .parse()
        .unwrap();
    request.metadata_mut().insert("traceparent", header);

    let response = interceptor
        .call(GET_USER, request, |ctx, n| async move {
            assert_eq!(ctx.route(), Some(GET_USER));
            ctx.set_attribute(KeyValue::new("tenant.id", "acme"));
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, Error>(n + 1)
        })
        .await
        .unwrap();
    assert_eq!(response.into_inner(), 3);

    assert!(server.metrics.request_size().is_none());
    assert_eq!(telemetry.point("rpc.server.active_requests").count(), 0.0);
    assert!(telemetry.point("rpc.server.request.duration").sum() >= 5.0);
    assert!(telemetry.metric("rpc.server.request.body.size").is_empty());

    let count = telemetry.point("rpc.server.request.count");
    assert_eq!(count.count(), 1.0);
    assert_eq!(count.attribute("tenant.id"), Some(&Value::from("acme")));
    assert_eq!(count.attribute("rpc.method"), Some(&Value::from(GET_USER)));

    let spans = telemetry.spans();
    assert_eq!(spans[0].parent_span_id, SpanId::from(0xdef_u64));
    assert_eq!(spans[0].span_context.trace_id(), TraceId::from(0xabc_u128));
}

#[tokio::test]
async fn test_skipped_method_is_not_measured() {
    let telemetry = TestTelemetry::new();
    let interceptor = UnaryInterceptor::new(
        telemetry.rpc(),
        UnaryInterceptorConfig {
            skip_methods: vec!["/grpc.health.v1.Health/Check".into()],
            ..UnaryInterceptorConfig::default()
        },
    );

    let status = interceptor
        .call("/grpc.health.v1.Health/Check", Request::new(()), |_ctx, _| async {
            Err::<(), _>(ErrorKind::Unauthenticated)
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert!(telemetry.metric("rpc.server.request.count").is_empty());
    assert!(telemetry.spans().is_empty());
}

#[tokio::test]
async fn test_access_log() {
    let telemetry = TestTelemetry::new();
    let logs = LogCapture::default();
    let _guard = logs.install("info");
    let interceptor = UnaryInterceptor::new(
        telemetry.rpc(),
        UnaryInterceptorConfig {
            access_log: true,
            access_log_level: tracing::Level::INFO,
            skip_methods: vec![],
        },
    );

    interceptor
        .call(GET_USER, Request::new(()), |_ctx, _| async {
            Err::<(), _>(ErrorKind::Forbidden.wrap("doc 1"))
        })
        .await
        .unwrap_err();

    let events = logs.events();
    assert_eq!(events[0]["fields"]["message"], "incoming grpc req");
    assert_eq!(events[1]["fields"]["message"], "outgoing grpc resp");
    assert_eq!(events[1]["fields"]["rpc.status_code"], "PermissionDenied");
    assert_eq!(events[1]["span"]["rpc.method"], GET_USER);
}

#[tokio::test]
async fn test_dropped_call_is_cancelled() {
    let telemetry = TestTelemetry::new();
    let interceptor = UnaryInterceptor::new(telemetry.rpc(), UnaryInterceptorConfig::default());

    let call = interceptor.call(GET_USER, Request::new(()), |_ctx, _| async {
        std::future::pending::<()>().await;
        Ok::<(), Error>(())
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(10), call).await;
    assert!(timed_out.is_err());

    assert_eq!(telemetry.point("rpc.server.active_requests").count(), 0.0);
    let spans = telemetry.spans();
    assert_eq!(spans[0].status, SpanStatus::error("request cancelled"));
    assert_eq!(
        attribute(&spans[0].attributes, "rpc.grpc.status_code"),
        Some(&Value::from(Code::Cancelled as i64))
    );
}
