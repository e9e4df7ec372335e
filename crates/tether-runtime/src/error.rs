//! Error types for tether operations
//!
//! Script exceptions keep the label, line and message reported by the engine so
//! callers can tell which evaluation failed and where.

use crate::uid::Uid;
use std::fmt;
use thiserror::Error;

/// Result type alias for tether operations
pub type TetherResult<T> = Result<T, TetherError>;

/// An uncaught script exception, correlated to the evaluation that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Label of the evaluation (`exec`, `eval`, a file path, ...)
    pub filename: String,
    /// Line reported by the engine, 0 when unknown
    pub line: u32,
    /// Stringified exception, e.g. `Error: boom`
    pub message: String,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.filename, self.line, self.message)
    }
}

impl std::error::Error for ErrorReport {}

/// Structured error types for tether operations
#[derive(Debug, Error)]
pub enum TetherError {
    /// The script raised an exception that reached the top of an evaluation
    #[error(transparent)]
    Script(#[from] ErrorReport),

    /// The engine call failed but no exception report could be found for it
    #[error("Failed to {operation} javascript and no error report found{}", format_detail(detail))]
    EvaluationFailed {
        operation: &'static str,
        detail: Option<String>,
    },

    /// The engine context could not be created
    #[error("Context creation failed: {0}")]
    ContextCreation(String),

    /// Operation on a context after `destroy`
    #[error("attempt to use a destroyed context")]
    DestroyedContext,

    /// Operation on a pool after `destroy`
    #[error("attempt to use a destroyed pool")]
    DestroyedPool,

    /// A proxy value that does not have a struct-like shape
    #[error("invalid proxy shape: {0}")]
    InvalidProxy(String),

    /// An object or function id unknown to the context
    #[error("{kind} {id} does not exist in this context")]
    UnknownEntity { kind: &'static str, id: Uid },

    /// A property name unknown to the bound object
    #[error("property {0} does not exist")]
    UnknownProperty(String),

    /// Assignment to a property of a read-only proxy
    #[error("property {0} is not settable")]
    NotSettable(String),

    /// Wrong number of arguments passed to a host function
    #[error(
        "Invalid number of arguments: expected {}{expected} got {actual}",
        if *variadic { "at least " } else { "" }
    )]
    ArgumentCount {
        expected: usize,
        actual: usize,
        variadic: bool,
    },

    /// A script value that cannot be coerced to the declared host kind
    #[error("cannot cast {actual} to {expected}{}", format_detail(detail))]
    TypeMismatch {
        expected: String,
        actual: String,
        detail: Option<String>,
    },

    /// A host function panicked
    #[error("{function}: {payload}")]
    HostPanic { function: String, payload: String },

    /// A fallible host function returned an error
    #[error("{function}: {message}")]
    HostFailure { function: String, message: String },

    /// Engine-level failure that is not a script exception
    #[error("Engine error: {0}")]
    Engine(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a script source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_detail(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

impl TetherError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an engine error
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Create a type mismatch without detail
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
            detail: None,
        }
    }

    /// Create a type mismatch carrying the codec's explanation
    pub fn type_mismatch_with(
        expected: impl Into<String>,
        actual: impl Into<String>,
        detail: impl fmt::Display,
    ) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
            detail: Some(detail.to_string()),
        }
    }

    /// Check if this error came from an uncaught script exception
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::Script(_))
    }

    /// Get the correlated exception report, if any
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            Self::Script(report) => Some(report),
            _ => None,
        }
    }

    /// Check if this error is caused by using a destroyed context or pool
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::DestroyedContext | Self::DestroyedPool)
    }

    /// Stable category name, suitable for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Script(_) => "script",
            Self::EvaluationFailed { .. } => "evaluation",
            Self::ContextCreation(_) => "context_creation",
            Self::DestroyedContext | Self::DestroyedPool => "destroyed",
            Self::InvalidProxy(_) | Self::UnknownEntity { .. } | Self::UnknownProperty(_) => {
                "invalid_use"
            }
            Self::NotSettable(_) | Self::ArgumentCount { .. } | Self::TypeMismatch { .. } => {
                "type"
            }
            Self::HostPanic { .. } | Self::HostFailure { .. } => "host",
            Self::Engine(_) => "engine",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<rquickjs::Error> for TetherError {
    fn from(err: rquickjs::Error) -> Self {
        Self::Engine(err.to_string())
    }
}
