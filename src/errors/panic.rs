//! Recovered panics.

use std::any::Any;
use std::backtrace::Backtrace;

use crate::context::RequestContext;

/// Text of a panic payload, for the two payload types `panic!` produces.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Log a recovered panic in the request logger with its message and stack.
pub fn log_panic(ctx: &RequestContext, payload: &(dyn Any + Send), message: &str) {
    let err = panic_message(payload);
    let stack = Backtrace::force_capture();
    ctx.logger().in_scope(|| {
        tracing::error!(err = %err, stack = %stack, "{message}");
    });
}
