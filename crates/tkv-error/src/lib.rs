//! Error taxonomy for the storage/concurrency core (§7).
//!
//! One enum per crate boundary: domain-specific errors (`LockError`,
//! `CodecError`) live in their own modules and compose into the
//! top-level [`Error`] via `#[from]`.

pub mod codec;
pub mod lock;

pub use codec::CodecError;
pub use lock::{DeadlockParticipant, DeadlockSet, LockError, LockerId};

/// Top-level error type returned by the public APIs of every crate in
/// this workspace (§7).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// Key not representable by the active view (bounded/reverse/
    /// transformed projection); out of scope to implement the views
    /// themselves, but the error variant is part of the core's contract
    /// with callers (§1 Non-goals, §7).
    #[error("key not representable by the active view")]
    ViewConstraint,

    /// Read from a value that does not exist, distinct from plain EOF on
    /// an existing value (§4.8, §7).
    #[error("no such value")]
    NoSuchValue,

    /// The page array cannot be extended further (§4.2, §7).
    #[error("database full")]
    DatabaseFull,

    #[error(transparent)]
    CorruptRedoLog(#[from] CodecError),

    /// A value cannot be coerced to the requested type; surfaced here only
    /// because the row layer that owns real conversions is out of scope
    /// (§1 Non-goals), but callers still need a variant to match on.
    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("i/o error: {0}")]
    Io(String),

    /// Unrecoverable; the database must be shut down (§7).
    #[error("panic: {0}")]
    Panic(String),
}

impl Error {
    #[must_use]
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    #[must_use]
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Convenience result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;
