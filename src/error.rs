//! Error discriminants for the tracer core.
//!
//! Every public operation that can fail reports one of these variants —
//! never a free-form string — so callers can match on cause instead of
//! parsing messages. See the error table in the design spec for the
//! handling policy attached to each kind.

use std::io;
use thiserror::Error;

/// Errors surfaced by public core operations.
#[derive(Debug, Error)]
pub enum TracerError {
    /// Null/out-of-range parameter to a public operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation illegal in the current state (e.g. dump without a mark).
    #[error("illegal state: {0}")]
    State(String),

    /// All 64 registry slots were taken at `register`.
    #[error("thread registry is full")]
    RegistryFull,

    /// The drain worker did not stop within its ceiling.
    #[error("shutdown timed out waiting for drain worker")]
    ShutdownTimeout,

    /// A write, fsync, or metadata-journal append failed.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),

    /// `ENOSPC` was observed on any write.
    #[error("disk full while writing {path}")]
    DiskFull { path: String },
}

impl TracerError {
    /// Classifies an I/O error as [`TracerError::DiskFull`] when the OS reports
    /// `ENOSPC`, otherwise wraps it as [`TracerError::IoFailure`].
    pub fn from_io(path: &str, err: io::Error) -> Self {
        if err.raw_os_error() == Some(libc::ENOSPC) {
            TracerError::DiskFull {
                path: path.to_string(),
            }
        } else {
            TracerError::IoFailure(err)
        }
    }
}

/// Errors specific to the selective-persistence controller (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectiveError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("operation illegal in current window state")]
    State,
    #[error("metadata journal write failed")]
    IoFailure,
}

/// Errors returned by ring/pool/lane operations on the hot path.
///
/// These are never surfaced to the instrumented application (§7's
/// propagation policy); producers consult them internally and fall back
/// to the backpressure controller or drop policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// The ring has no free space for the requested write.
    #[error("ring buffer is full")]
    WriteFull,
    /// The pool has no empty ring to swap in.
    #[error("ring pool exhausted")]
    PoolExhausted,
}
