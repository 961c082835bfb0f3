//! Crate-wide error type for the operations exposed at the tool boundary.
//!
//! Internal code keeps using `anyhow::Result` for `?`-propagation, the way
//! the rest of this codebase always has; `Error` only appears at the edges
//! that `tools.rs` exposes, where a caller needs to distinguish "not found"
//! from "bad input" from "the database is unhappy".

use thiserror::Error;

/// Error surfaced by a core operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller supplied input that fails the operation's contract.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A deadline-bounded operation (embedding call, runner, scheduler claim) did not complete.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// The database reported an error (I/O, corruption, constraint violation).
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The embedding model or a task runner reported an error.
    #[error("downstream error: {0}")]
    Downstream(String),

    /// Required configuration was missing or invalid at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn downstream(msg: impl Into<String>) -> Self {
        Error::Downstream(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}

/// Convert an opaque `anyhow::Error` at a tool boundary into a `Downstream` error.
///
/// Used where internal helpers return `anyhow::Result` and the caller is a
/// `tools.rs` handler that needs a typed `Error` to report back.
impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Downstream(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
