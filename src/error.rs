//! Centralized error handling for tabwright.
//!
//! Every fallible operation returns [`Result<T>`], whose error type is the
//! [`EngineError`] enum. The variants follow the engine's error taxonomy:
//!
//! - [`EngineError::RuntimeUnavailable`]: the runtime bridge is not ready and the
//!   operation has no fallback.
//! - [`EngineError::RuntimeExecution`]: the runtime raised while running a script.
//!   The message is the raw diagnostic and is meant to be shown verbatim.
//! - [`EngineError::Coercion`]: a value could not be converted to the target type.
//!   Preview operations count these instead of returning them.
//! - [`EngineError::Persistence`]: the durable blob store could not be opened, read
//!   or written.
//!
//! Session operations catch all of these at the boundary and record them in the
//! last-error slot, so nothing escapes as an unhandled failure:
//!
//! ```
//! use tabwright::error::{EngineError, ErrorKind};
//!
//! let err = EngineError::ColumnNotFound("age".to_owned());
//! assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
//! assert_eq!(err.to_string(), "Column not found: age");
//! ```
//!
//! ## Context Extension Trait
//!
//! [`ResultExt`] adds `.context()` to any `Result` whose error converts into
//! [`EngineError`]:
//!
//! ```no_run
//! use tabwright::error::ResultExt as _;
//!
//! fn read_blob(path: &str) -> tabwright::error::Result<Vec<u8>> {
//!     std::fs::read(path).context("Failed to read blob")
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Main error type for engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// The runtime bridge is not in the `Ready` state.
    RuntimeUnavailable(String),

    /// The runtime raised while executing a script (raw diagnostic).
    RuntimeExecution(String),

    /// A value could not be converted to the requested type.
    Coercion(String),

    /// Durable store open/put/get failure.
    Persistence(String),

    /// The named column is not part of the current table.
    ColumnNotFound(String),

    /// An operation was called with arguments it cannot work with.
    InvalidArgument(String),

    /// A table violates a structural invariant (duplicate columns, ragged rows).
    InvalidTable(String),

    /// I/O errors
    Io(std::io::Error),

    /// Configuration errors
    Config(String),

    /// Generic error with context
    Other(String),
}

/// Coarse classification of an [`EngineError`], cheap to copy and serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    RuntimeUnavailable,
    RuntimeExecution,
    Coercion,
    Persistence,
    ColumnNotFound,
    InvalidArgument,
    InvalidTable,
    Io,
    Config,
    Other,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            Self::RuntimeExecution(_) => ErrorKind::RuntimeExecution,
            Self::Coercion(_) => ErrorKind::Coercion,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::ColumnNotFound(_) => ErrorKind::ColumnNotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidTable(_) => ErrorKind::InvalidTable,
            Self::Io(_) => ErrorKind::Io,
            Self::Config(_) => ErrorKind::Config,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// True for errors raised by (or about) the runtime path.
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            Self::RuntimeUnavailable(_) | Self::RuntimeExecution(_)
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RuntimeUnavailable(msg) => write!(f, "Runtime unavailable: {msg}"),
            Self::RuntimeExecution(msg) => write!(f, "Runtime execution error: {msg}"),
            Self::Coercion(msg) => write!(f, "Coercion failure: {msg}"),
            Self::Persistence(msg) => write!(f, "Persistence error: {msg}"),
            Self::ColumnNotFound(name) => write!(f, "Column not found: {name}"),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Self::InvalidTable(msg) => write!(f, "Invalid table: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {err}"))
    }
}

// Polars errors only surface from inside runtime scripts.
impl From<polars::error::PolarsError> for EngineError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::RuntimeExecution(err.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::RuntimeExecution(format!("runtime task aborted: {err}"))
    }
}

// UI collaborators receive plain strings
impl From<EngineError> for String {
    fn from(err: EngineError) -> Self {
        err.to_string()
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error, keeping its kind.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<EngineError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        let msg = msg.into();
        self.map_err(|e| prefix(e.into(), &msg))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| prefix(e.into(), &f()))
    }
}

fn prefix(err: EngineError, msg: &str) -> EngineError {
    match err {
        EngineError::RuntimeUnavailable(m) => EngineError::RuntimeUnavailable(format!("{msg}: {m}")),
        EngineError::RuntimeExecution(m) => EngineError::RuntimeExecution(format!("{msg}: {m}")),
        EngineError::Coercion(m) => EngineError::Coercion(format!("{msg}: {m}")),
        EngineError::Persistence(m) => EngineError::Persistence(format!("{msg}: {m}")),
        EngineError::Io(e) => EngineError::Persistence(format!("{msg}: {e}")),
        other => EngineError::Other(format!("{msg}: {other}")),
    }
}
