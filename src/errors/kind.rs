//! Sentinel error kinds and the wrapping error type.

use std::fmt;

/// Boxed error used at the transport boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Closed classification bucket used to pick a transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input data is invalid.
    InvalidData,
    /// The requested resource does not exist.
    NotFound,
    /// The subject is authenticated but not allowed to do this.
    Forbidden,
    /// The resource already exists or another data conflict occurred.
    Conflict,
    /// The subject could not be authenticated.
    Unauthenticated,
    /// Anything else. Never shown to clients in detail.
    Internal,
}

impl ErrorKind {
    /// Sentinel kinds in classification priority order.
    pub const SENTINELS: [ErrorKind; 5] = [
        ErrorKind::InvalidData,
        ErrorKind::NotFound,
        ErrorKind::Forbidden,
        ErrorKind::Conflict,
        ErrorKind::Unauthenticated,
    ];

    /// Short text used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidData => "invalid data",
            ErrorKind::NotFound => "not found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Internal => "internal error",
        }
    }

    /// Wrap this kind with a more specific message.
    ///
    /// `ErrorKind::NotFound.wrap("user 123")` displays as `user 123: not found`.
    pub fn wrap(self, context: impl Into<String>) -> Error {
        Error::new(self, context)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorKind {}

/// A sentinel kind plus a specific message and an optional cause.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: String,
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
            source: None,
        }
    }

    /// Attach the underlying cause. It shows up in the `source()` chain.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn invalid_data(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidData, context)
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, context)
    }

    pub fn forbidden(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, context)
    }

    pub fn conflict(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, context)
    }

    pub fn unauthenticated(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, context)
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, context)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.context, self.kind)
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_context() {
        assert_eq!(ErrorKind::NotFound.wrap("user 123").to_string(), "user 123: not found");
        assert_eq!(Error::from(ErrorKind::Conflict).to_string(), "conflict");
    }

    #[test]
    fn test_source_is_exposed() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = Error::internal("save user").with_source(io);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk on fire"));
    }
}
