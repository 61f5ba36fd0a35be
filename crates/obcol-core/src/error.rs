#![forbid(unsafe_code)]

//! Error types for observable collections.
//!
//! Failures are never recovered locally: a forwarded operation that fails
//! aborts that single call and the error reaches the caller unchanged. The
//! raw [`Container`](crate::Container) API returns the same errors, so code
//! sees identical failures whether or not a collection is wrapped.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::container::ContainerKind;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from container operations, interception, and locking.
#[derive(Debug, Error)]
pub enum Error {
    /// Locking was requested on a proxy built without a lock file.
    #[error("locking requested but no lock target specified")]
    Configuration,

    /// The operation does not exist for this kind of container.
    #[error("operation `{op}` is not supported by a {kind}")]
    UnsupportedOperation { op: String, kind: ContainerKind },

    /// The operation takes a callback and cannot run through `invoke`.
    #[error("operation `{op}` requires a callback")]
    CallbackRequired { op: &'static str },

    /// Opening or locking the lock file failed at the OS level.
    #[error("failed to lock {}: {source}", path.display())]
    LockAcquisition {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The proxy already holds its lock; a second flock would self-deadlock.
    #[error("lock is already held by this collection")]
    LockReentry,

    /// `fetch` of a key that is not present.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// An index outside the sequence bounds.
    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    /// Sorting hit two values with no ordering between them.
    #[error("comparison of {left} with {right} failed")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },

    /// An argument had the wrong shape for the operation.
    #[error("invalid argument for `{op}`: expected {expected}")]
    InvalidArgument {
        op: &'static str,
        expected: &'static str,
    },

    /// Proxy options could not be decoded.
    #[error("invalid proxy options: {0}")]
    Options(#[from] serde_json::Error),
}
