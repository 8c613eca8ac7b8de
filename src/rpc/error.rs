//! RPC error translation.

use std::error::Error as StdError;

use tonic::{Code, Status};

use crate::context::RequestContext;
use crate::errors::{self, ClassifiedError, ErrorKind};

/// Generic message sent for internal failures.
pub const INTERNAL_MESSAGE: &str = "internal error";

/// RPC code for a classified kind.
pub fn code_for(kind: ErrorKind) -> Code {
    match kind {
        ErrorKind::InvalidData => Code::InvalidArgument,
        ErrorKind::NotFound => Code::NotFound,
        ErrorKind::Forbidden => Code::PermissionDenied,
        ErrorKind::Conflict => Code::AlreadyExists,
        ErrorKind::Unauthenticated => Code::Unauthenticated,
        ErrorKind::Internal => Code::Internal,
    }
}

/// Kind an RPC code stands for. Inverse of [`code_for`].
pub fn kind_for_code(code: Code) -> ErrorKind {
    match code {
        Code::InvalidArgument => ErrorKind::InvalidData,
        Code::NotFound => ErrorKind::NotFound,
        Code::PermissionDenied => ErrorKind::Forbidden,
        Code::AlreadyExists => ErrorKind::Conflict,
        Code::Unauthenticated => ErrorKind::Unauthenticated,
        _ => ErrorKind::Internal,
    }
}

/// True for codes that indicate a server-side fault.
pub fn is_server_fault(code: Code) -> bool {
    matches!(
        code,
        Code::Unknown
            | Code::DeadlineExceeded
            | Code::Unimplemented
            | Code::Internal
            | Code::Unavailable
            | Code::DataLoss
    )
}

/// Turns handler errors into RPC statuses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcErrorTranslator;

impl RpcErrorTranslator {
    pub fn new() -> Self {
        Self
    }

    /// A `Status` anywhere in the chain is returned as is. Otherwise the code
    /// follows the classification and the message is the error text, except
    /// for internal errors which are logged and answered generically.
    pub fn translate(&self, err: &(dyn StdError + 'static), ctx: &RequestContext) -> Status {
        if let Some(status) = errors::find::<Status>(err) {
            return status.clone();
        }

        let classified = ClassifiedError::new(err);
        match classified.kind {
            ErrorKind::Internal => {
                ctx.logger().in_scope(|| {
                    tracing::error!(err = %err, err.debug = ?err, "internal server error");
                });
                Status::internal(INTERNAL_MESSAGE)
            }
            kind => Status::new(code_for(kind), classified.message()),
        }
    }
}
