//! Error kinds shared across the scheduling core.

use thiserror::Error;

/// Fatal at workflow construction — the run never starts.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

/// Fatal at workflow construction — the induced task graph has a cycle.
#[derive(Debug, Error)]
#[error("cycle detected in task graph, involving task '{task_id}'")]
pub struct CycleError {
    pub task_id: String,
}

/// Raised when a task's `function_ref` has no registered implementation.
#[derive(Debug, Error)]
#[error("unknown function: {0}")]
pub struct UnknownFunction(pub String);

/// Raised by fingerprinting when an argument isn't representable as a
/// canonical value. Downgrades the task to cache-bypass rather than
/// failing it.
#[derive(Debug, Error)]
#[error("cannot fingerprint argument: {0}")]
pub struct FingerprintError(pub String);

/// The kind of a terminal task failure, carried on `TaskOutcome::error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TaskThrew,
    TaskTimeout,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::TaskThrew => "thrown",
            ErrorKind::TaskTimeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// A task failure descriptor: kind + message, as returned by the pool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn thrown(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::TaskThrew,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::TaskTimeout,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: message.into(),
        }
    }
}

/// Cache I/O failures. Reads are swallowed as misses; writes are logged
/// but never fail the task that produced the result.
#[derive(Debug, Error)]
pub enum CacheReadError {
    #[error("cache read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
#[error("cache write failed: {0}")]
pub struct CacheWriteError(#[from] pub std::io::Error);

/// A scheduler invariant violation. Aborts the run with exit code 3.
#[derive(Debug, Error)]
#[error("internal scheduler error: {0}")]
pub struct InternalError(pub String);

/// Fatal at workflow construction: a `Scheduler` never starts running if
/// the workflow graph has a cycle or names an unresolvable
/// `function_ref`.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    UnknownFunction(#[from] UnknownFunction),
}
