//! Unary call interceptor.
//!
//! # Responsibilities
//! - Build the request context (logger with `rpc.method`, trace ids)
//! - Continue a trace propagated in `traceparent` metadata
//! - Active/count/duration metrics and the server span
//! - Optional access log, panic recovery, error translation
//!
//! # Design Decisions
//! - Skipped methods (health checks) still get recovery and translation,
//!   only telemetry and the access log are left out
//! - A dropped call is recorded with status `CANCELLED`

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tonic::{Code, Request, Response, Status};
use tracing::field::Empty;
use tracing::{Instrument, Level};

use crate::config::RpcConfig;
use crate::context::{KeyValue, RequestContext};
use crate::errors::{log_panic, BoxError};
use crate::observability::logging::parse_level;
use crate::observability::request::{
    Cancellation, ObservationStart, Outcome, RequestObservation, ServerTelemetry,
};
use crate::observability::trace::extract_rpc;
use crate::rpc::error::{is_server_fault, RpcErrorTranslator, INTERNAL_MESSAGE};

const STATUS_KEY: &str = "rpc.grpc.status_code";

#[derive(Debug, Clone)]
pub struct UnaryInterceptorConfig {
    pub access_log: bool,
    pub access_log_level: Level,
    pub skip_methods: Vec<String>,
}

impl Default for UnaryInterceptorConfig {
    fn default() -> Self {
        Self::from(&RpcConfig::default())
    }
}

impl From<&RpcConfig> for UnaryInterceptorConfig {
    fn from(config: &RpcConfig) -> Self {
        Self {
            access_log: config.access_log,
            access_log_level: parse_level(&config.access_log_level),
            skip_methods: config.skip_methods.clone(),
        }
    }
}

/// Wraps unary handlers with context, telemetry and error translation.
#[derive(Debug, Clone)]
pub struct UnaryInterceptor {
    telemetry: ServerTelemetry,
    config: Arc<UnaryInterceptorConfig>,
    translator: RpcErrorTranslator,
}

impl UnaryInterceptor {
    pub fn new(telemetry: ServerTelemetry, config: UnaryInterceptorConfig) -> Self {
        Self {
            telemetry,
            config: Arc::new(config),
            translator: RpcErrorTranslator::new(),
        }
    }

    fn skips(&self, method: &str) -> bool {
        self.config.skip_methods.iter().any(|m| m == method)
    }

    /// Run `handler` for one call of `method` (full name, e.g.
    /// `/users.v1.Users/Get`).
    pub async fn call<Req, Resp, E, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        handler: F,
    ) -> Result<Response<Resp>, Status>
    where
        F: FnOnce(RequestContext, Req) -> Fut,
        Fut: Future<Output = Result<Resp, E>>,
        E: Into<BoxError>,
    {
        let parent = extract_rpc(request.metadata());
        let logger = tracing::info_span!(
            "rpc",
            rpc.method = %method,
            trace_id = Empty,
            span_id = Empty,
        );
        let ctx = RequestContext::with_route(logger, method);
        let message = request.into_inner();

        let skipped = self.skips(method);
        let observation = (!skipped).then(|| {
            RequestObservation::start(
                &self.telemetry,
                ctx.clone(),
                ObservationStart {
                    span_name: method.to_string().into(),
                    parent,
                    attributes: vec![
                        KeyValue::new("rpc.system", "grpc"),
                        KeyValue::new("rpc.method", method.to_string()),
                    ],
                    request_size: None,
                    cancellation: Cancellation {
                        status: KeyValue::new(STATUS_KEY, Code::Cancelled as i64),
                    },
                },
            )
        });

        let access_log = self.config.access_log && !skipped;
        let level = self.config.access_log_level;
        if access_log {
            ctx.logger()
                .in_scope(|| crate::event_at!(level, "incoming grpc req"));
        }

        let started = Instant::now();
        let handler_ctx = ctx.clone();
        let result = AssertUnwindSafe(async move { handler(handler_ctx, message).await })
            .catch_unwind()
            .instrument(ctx.logger().clone())
            .await;

        let result = match result {
            Ok(Ok(resp)) => Ok(Response::new(resp)),
            Ok(Err(err)) => {
                let err: BoxError = err.into();
                Err(self.translator.translate(err.as_ref(), &ctx))
            }
            Err(payload) => {
                log_panic(&ctx, payload.as_ref(), "grpc handler panicked and recovered");
                Err(Status::internal(INTERNAL_MESSAGE))
            }
        };

        let code = match &result {
            Ok(_) => Code::Ok,
            Err(status) => status.code(),
        };

        if access_log {
            let duration_ms = started.elapsed().as_millis() as u64;
            ctx.logger().in_scope(|| match &result {
                Ok(_) => crate::event_at!(
                    level,
                    rpc.duration_ms = duration_ms,
                    rpc.status_code = ?code,
                    "outgoing grpc resp"
                ),
                Err(status) => crate::event_at!(
                    level,
                    rpc.duration_ms = duration_ms,
                    rpc.status_code = ?code,
                    err = %status.message(),
                    "outgoing grpc resp"
                ),
            });
        }

        if let Some(observation) = observation {
            let status = KeyValue::new(STATUS_KEY, code as i64);
            let outcome = match &result {
                Err(s) if is_server_fault(code) => Outcome::failed(status, s.message()),
                _ => Outcome::ok(status),
            };
            observation.finish(outcome);
        }

        result
    }
}
