//! service-kit demo service.
//!
//! A small user directory wired through the full stack.
//!
//! ```text
//!     Client Request
//!     ─────────────▶ timeout → recover → request id → context → telemetry
//!                    → access log → recover → error translation → handler
//!                                                      │
//!                                                      ▼
//!                                              user store lookup
//!                                                      │
//!                                    ObserverChain (log, trace, meter)
//!
//!     Telemetry: SDK providers → batch / periodic export → exclusion → Prometheus / logs
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use service_kit::config::{load_config, ServiceConfig};
use service_kit::context::{KeyValue, RequestContext};
use service_kit::errors::ErrorKind;
use service_kit::http::{HandlerError, HttpErrorTranslator, HttpServer, HttpStack, RpcStatusFallback};
use service_kit::lifecycle::{spawn_signal_handler, Shutdown};
use service_kit::observability::logging::init_logging;
use service_kit::observability::meter::ServerMetricsConfig;
use service_kit::observability::provider::server_metrics_config;
use service_kit::observability::Telemetry;
use service_kit::observer::{
    LogQueryObserver, MeterQueryObserver, ObservedQuery, ObserverChain, TraceQueryObserver,
};

#[derive(Debug, Parser)]
#[command(name = "service-kit", version, about = "Observability toolkit demo service")]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[derive(Clone)]
struct AppState {
    users: Arc<DashMap<u64, User>>,
    observers: ObserverChain,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };

    init_logging(&config.log)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %config.app.service_name,
        "service-kit starting"
    );

    let telemetry = Telemetry::from_config(&config)?;
    let metrics_config = server_metrics_config(
        ServerMetricsConfig::http(),
        &config.telemetry.meter.server,
    );
    let stack = HttpStack::new(config.http.clone(), telemetry.server(&metrics_config))
        .with_translator(HttpErrorTranslator::new().with_fallback(RpcStatusFallback));

    let state = AppState {
        users: Arc::new(DashMap::new()),
        observers: ObserverChain::new()
            .with(LogQueryObserver::default())
            .with(TraceQueryObserver::new(telemetry.tracer().clone(), "memory"))
            .with(MeterQueryObserver::new(telemetry.meter(), "memory")),
    };
    let server = HttpServer::new(&stack, routes(state));

    let listener = TcpListener::bind(&config.http.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        request_timeout_secs = config.http.request_timeout_secs,
        "Listening for connections"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    server.run(listener, shutdown.listen()).await?;

    telemetry.shutdown().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn routes(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/users", axum::routing::post(create_user))
        .route("/users/{id}", get(get_user))
        .route("/panic", get(panic_handler))
        .with_state(state)
}

async fn get_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<u64>,
) -> Result<Json<User>, HandlerError> {
    ctx.set_attribute(KeyValue::new("app.operation", "get_user"));

    let start = SystemTime::now();
    let found = state.users.get(&id).map(|u| u.clone());
    let result = found.ok_or_else(|| ErrorKind::NotFound.wrap(format!("user {id}")));
    observe(&state, &ctx, "SELECT * FROM users WHERE id = ?", start, &result);

    Ok(Json(result?))
}

async fn create_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(user): Json<User>,
) -> Result<(StatusCode, Json<User>), HandlerError> {
    ctx.set_attribute(KeyValue::new("app.operation", "create_user"));
    if user.name.trim().is_empty() {
        return Err(ErrorKind::InvalidData.wrap("user name is empty").into());
    }

    let start = SystemTime::now();
    let result = match state.users.entry(user.id) {
        Entry::Occupied(_) => Err(ErrorKind::Conflict.wrap(format!("user {}", user.id))),
        Entry::Vacant(slot) => {
            slot.insert(user.clone());
            Ok(user)
        }
    };
    observe(&state, &ctx, "INSERT INTO users (id, name) VALUES (?, ?)", start, &result);

    Ok((StatusCode::CREATED, Json(result?)))
}

async fn panic_handler() -> &'static str {
    tokio::time::sleep(Duration::from_millis(1)).await;
    panic!("demo panic");
}

fn observe<T>(
    state: &AppState,
    ctx: &RequestContext,
    statement: &str,
    start: SystemTime,
    result: &Result<T, service_kit::errors::Error>,
) {
    let error = result
        .as_ref()
        .err()
        .map(|e| {
            Arc::new(service_kit::errors::Error::new(e.kind(), e.context()))
                as Arc<dyn std::error::Error + Send + Sync>
        });
    state.observers.observe(
        ctx,
        &ObservedQuery {
            statement: statement.to_string(),
            keyspace: "users".to_string(),
            rows: u64::from(result.is_ok()),
            attempt: 0,
            start,
            end: SystemTime::now(),
            error,
        },
    );
}
