//! Error classification.
//!
//! # Responsibilities
//! - Walk an error's `source()` chain
//! - Resolve exactly one `ErrorKind` with a fixed priority
//! - Answer membership questions (`is`, `is_one_of`)

use std::error::Error as StdError;

use crate::errors::kind::{Error, ErrorKind};
use crate::http::error::{kind_for_status, HttpError};
use crate::rpc::error::kind_for_code;

/// An error after classification, consumed once by a transport translator.
#[derive(Debug, Clone, Copy)]
pub struct ClassifiedError<'a> {
    pub kind: ErrorKind,
    pub cause: &'a (dyn StdError + 'static),
}

impl<'a> ClassifiedError<'a> {
    pub fn new(cause: &'a (dyn StdError + 'static)) -> Self {
        Self {
            kind: classify(cause),
            cause,
        }
    }

    /// The client-facing message of the original error. An RPC status
    /// contributes its message, not its debug rendering.
    pub fn message(&self) -> String {
        match self.cause.downcast_ref::<tonic::Status>() {
            Some(status) => status.message().to_string(),
            None => self.cause.to_string(),
        }
    }
}

/// Classify an arbitrary error.
///
/// Priority: an error already expressed in a transport status, then
/// `InvalidData`, `NotFound`, `Forbidden`, `Conflict`, `Unauthenticated`.
/// Everything else is `Internal`.
pub fn classify(err: &(dyn StdError + 'static)) -> ErrorKind {
    if let Some(kind) = chain(err).find_map(protocol_kind) {
        return kind;
    }
    sentinel(err).unwrap_or(ErrorKind::Internal)
}

/// The highest-priority sentinel kind in the chain, ignoring transport errors.
pub fn sentinel(err: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    ErrorKind::SENTINELS.into_iter().find(|kind| is(err, *kind))
}

/// First error of type `T` in the chain.
pub fn find<'a, T: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    chain(err).find_map(|e| e.downcast_ref::<T>())
}

/// True if `kind` appears anywhere in the chain as a sentinel.
pub fn is(err: &(dyn StdError + 'static), kind: ErrorKind) -> bool {
    chain(err).any(|e| sentinel_kind(e) == Some(kind))
}

/// True if the error carries one of `kinds`.
///
/// `None` is never one of anything. An empty `kinds` slice checks against all
/// sentinel kinds.
pub fn is_one_of(err: Option<&(dyn StdError + 'static)>, kinds: &[ErrorKind]) -> bool {
    let Some(err) = err else {
        return false;
    };
    let kinds = if kinds.is_empty() {
        &ErrorKind::SENTINELS[..]
    } else {
        kinds
    };
    kinds.iter().any(|kind| is(err, *kind))
}

fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |&e: &&'a (dyn StdError + 'static)| e.source())
}

fn sentinel_kind(err: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    if let Some(kind) = err.downcast_ref::<ErrorKind>() {
        return Some(*kind);
    }
    err.downcast_ref::<Error>().map(Error::kind)
}

fn protocol_kind(err: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    if let Some(http) = err.downcast_ref::<HttpError>() {
        return Some(kind_for_status(http.status()));
    }
    err.downcast_ref::<tonic::Status>()
        .map(|status| kind_for_code(status.code()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::fmt;

    /// Adds context without knowing anything about the taxonomy.
    #[derive(Debug)]
    struct Layer {
        msg: &'static str,
        inner: Box<dyn StdError + Send + Sync>,
    }

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}: {}", self.msg, self.inner)
        }
    }

    impl StdError for Layer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(self.inner.as_ref())
        }
    }

    fn layer(msg: &'static str, inner: impl Into<Box<dyn StdError + Send + Sync>>) -> Layer {
        Layer { msg, inner: inner.into() }
    }

    #[test]
    fn test_every_kind_round_trips() {
        for kind in ErrorKind::SENTINELS.into_iter().chain([ErrorKind::Internal]) {
            let wrapped = layer("repository", kind.wrap("lookup"));
            assert_eq!(classify(&wrapped), kind);
            assert_eq!(classify(&kind), kind);
        }
    }

    #[test]
    fn test_unknown_errors_are_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        assert_eq!(classify(&io), ErrorKind::Internal);
    }

    #[test]
    fn test_priority_is_fixed() {
        let err = Error::not_found("user").with_source(ErrorKind::InvalidData);
        assert_eq!(classify(&err), ErrorKind::InvalidData);
    }

    #[test]
    fn test_protocol_errors_win() {
        let http = HttpError::new(StatusCode::CONFLICT, "taken");
        let err = layer("outer", http).to_string();
        assert_eq!(err, "outer: taken");

        let wrapped = layer("outer", HttpError::new(StatusCode::CONFLICT, "taken"));
        assert_eq!(classify(&wrapped), ErrorKind::Conflict);

        let status = tonic::Status::permission_denied("nope");
        assert_eq!(classify(&status), ErrorKind::Forbidden);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let err = ErrorKind::Unauthenticated.wrap("token expired");
        let first = classify(&err);
        let as_http = HttpError::new(crate::http::error::status_for(first), err.to_string());
        assert_eq!(classify(&as_http), first);
    }

    #[test]
    fn test_sentinel_ignores_transport_errors() {
        let status = tonic::Status::not_found("row");
        assert_eq!(sentinel(&status), None);
        let wrapped = layer("outer", ErrorKind::Forbidden.wrap("doc"));
        assert_eq!(sentinel(&wrapped), Some(ErrorKind::Forbidden));
        assert!(find::<Error>(&wrapped).is_some());
    }

    #[test]
    fn test_is_one_of() {
        assert!(!is_one_of(None, &[]));
        assert!(!is_one_of(None, &[ErrorKind::NotFound]));

        let err = layer("svc", ErrorKind::Conflict.wrap("email"));
        assert!(is_one_of(Some(&err), &[]));
        assert!(is_one_of(Some(&err), &[ErrorKind::NotFound, ErrorKind::Conflict]));
        assert!(!is_one_of(Some(&err), &[ErrorKind::NotFound]));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(!is_one_of(Some(&io), &[]));
    }

    #[test]
    fn test_classified_error_keeps_message() {
        let err = ErrorKind::NotFound.wrap("user 123");
        let classified = ClassifiedError::new(&err);
        assert_eq!(classified.kind, ErrorKind::NotFound);
        assert_eq!(classified.message(), "user 123: not found");

        let status = tonic::Status::already_exists("email taken");
        let classified = ClassifiedError::new(&status);
        assert_eq!(classified.kind, ErrorKind::Conflict);
        assert_eq!(classified.message(), "email taken");
    }

    #[test]
    fn test_find_borrows_from_chain() {
        let err = layer("outer", layer("middle", ErrorKind::Conflict.wrap("email")));
        let found: &Error = find::<Error>(&err).unwrap();
        assert_eq!(found.kind(), ErrorKind::Conflict);
        assert_eq!(chain(&err).count(), 3);
        assert!(find::<HttpError>(&err).is_none());
    }
}
