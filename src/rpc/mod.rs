//! RPC transport support.
//!
//! # Data Flow
//! ```text
//! tonic service method
//!     → interceptor.rs (context, span, metrics, access log, panic recovery)
//!     → handler(ctx, request) → Result<Response, E>
//!     → error.rs (E → tonic::Status)
//! ```
//!
//! # Design Decisions
//! - The interceptor wraps one unary call; the service keeps tonic's types
//! - Status codes follow the same classification as the HTTP side

pub mod error;
pub mod interceptor;

pub use error::{code_for, kind_for_code, RpcErrorTranslator};
pub use interceptor::{UnaryInterceptor, UnaryInterceptorConfig};
