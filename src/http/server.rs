//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap application routes in the middleware stack
//! - Bind the router to a listener with peer address info
//! - Graceful shutdown bounded by a drain timeout
//!
//! # Design Decisions
//! - Application routes are plain Axum routers; the stack is added here
//! - Handlers reach the request context through the `RequestContext`
//!   extractor

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderName;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;

use crate::config::HttpConfig;
use crate::http::error::HttpErrorTranslator;
use crate::http::middleware::{
    access_log, recover, request_context, telemetry, translate_errors, AccessLogState,
    ContextConfig, TelemetryState,
};
use crate::http::request::{Skipper, X_REQUEST_ID};
use crate::observability::logging::parse_level;
use crate::observability::request::ServerTelemetry;

/// Everything the middleware stack needs besides the routes.
#[derive(Debug, Clone)]
pub struct HttpStack {
    pub config: HttpConfig,
    pub telemetry: ServerTelemetry,
    pub translator: HttpErrorTranslator,
    /// Replaces the `skip_paths` skipper when set.
    pub skipper: Option<Skipper>,
}

impl HttpStack {
    pub fn new(config: HttpConfig, telemetry: ServerTelemetry) -> Self {
        Self {
            config,
            telemetry,
            translator: HttpErrorTranslator::new(),
            skipper: None,
        }
    }

    pub fn with_translator(mut self, translator: HttpErrorTranslator) -> Self {
        self.translator = translator;
        self
    }

    /// Decide which requests bypass telemetry and access logging.
    pub fn with_skipper(mut self, skipper: Skipper) -> Self {
        self.skipper = Some(skipper);
        self
    }

    /// Apply the middleware stack to `routes`. Layers are listed innermost
    /// first.
    ///
    /// Panics are caught twice: next to the handler, where the request
    /// context is available for the log, and again at the outer edge for
    /// anything raised by the surrounding middleware.
    #[allow(deprecated)]
    pub fn apply(&self, routes: Router) -> Router {
        let skipper = self
            .skipper
            .clone()
            .unwrap_or_else(|| Skipper::paths(self.config.skip_paths.iter().cloned()));
        let request_id = HeaderName::from_static(X_REQUEST_ID);

        let mut router = routes
            .layer(middleware::from_fn_with_state(
                self.translator.clone(),
                translate_errors,
            ))
            .layer(middleware::from_fn(recover));

        if self.config.access_log {
            router = router.layer(middleware::from_fn_with_state(
                AccessLogState {
                    level: parse_level(&self.config.access_log_level),
                    skipper: skipper.clone(),
                },
                access_log,
            ));
        }

        router
            .layer(middleware::from_fn_with_state(
                TelemetryState {
                    telemetry: self.telemetry.clone(),
                    skipper,
                },
                telemetry,
            ))
            .layer(middleware::from_fn_with_state(
                ContextConfig {
                    log_request_details: self.config.log_request_details,
                },
                request_context,
            ))
            .layer(PropagateRequestIdLayer::new(request_id.clone()))
            .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
            .layer(middleware::from_fn(recover))
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
    }
}

/// HTTP server around a fully layered router.
pub struct HttpServer {
    router: Router,
    shutdown_timeout: Duration,
}

impl HttpServer {
    pub fn new(stack: &HttpStack, routes: Router) -> Self {
        Self {
            router: stack.apply(routes),
            shutdown_timeout: Duration::from_secs(stack.config.shutdown_timeout_secs),
        }
    }

    /// The layered router, for driving requests without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` completes, then drain in-flight requests for at
    /// most the shutdown timeout.
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> Result<(), std::io::Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let shutdown_timeout = self.shutdown_timeout;
        tracing::info!(address = %addr, "HTTP server starting");

        let (stopping_tx, mut stopping_rx) = watch::channel(false);
        let signal = async move {
            shutdown.await;
            let _ = stopping_tx.send(true);
        };

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(listener, app).with_graceful_shutdown(signal);
        let drain_deadline = async move {
            let _ = stopping_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(shutdown_timeout).await;
        };

        tokio::select! {
            result = async move { serve.await } => result?,
            _ = drain_deadline => {
                tracing::warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Shutdown timeout reached, dropping in-flight requests"
                );
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
