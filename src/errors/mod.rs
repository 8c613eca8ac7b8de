//! Protocol-agnostic error taxonomy.
//!
//! # Data Flow
//! ```text
//! handler / repository code
//!     → returns ErrorKind::NotFound.wrap("user 123")   (kind.rs)
//!     → any number of wrapping layers (source() chain)
//!     → classify.rs walks the chain, picks exactly one ErrorKind
//!     → http::error / rpc::error turn the kind into a transport status
//! ```
//!
//! # Design Decisions
//! - Sentinel kinds are plain values, so `errors::is(err, ErrorKind::Conflict)`
//!   works through arbitrary wrapping
//! - Classification is total: anything unrecognized is `Internal`
//! - Errors that already carry a transport status (`HttpError`, `tonic::Status`)
//!   win over sentinels found deeper in the chain

pub mod classify;
pub mod kind;
pub mod panic;

pub use classify::{classify, find, is, is_one_of, sentinel, ClassifiedError};
pub use kind::{BoxError, Error, ErrorKind};
pub use panic::{log_panic, panic_message};
