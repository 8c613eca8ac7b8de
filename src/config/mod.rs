//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → read once at startup by logging, telemetry and the server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; exclusion rules compiled from it never change
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, BatchSettings, HttpConfig, LogConfig, MeterConfig, RpcConfig,
    ServerInstrumentsConfig, ServiceConfig, TelemetryConfig, TraceConfig,
};
pub use validation::{validate_config, ValidationError};
