//! Error types for the batch pipeline
//!
//! Per-item failures (`TransformError`) never abort a batch: they are attached
//! to the failed record and handed back to the caller. Only `PipelineError`
//! stops a batch call, and only for defects.

use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::state::record::RecordId;

/// Shared, cloneable error source
pub type SharedSource = Arc<dyn StdError + Send + Sync>;

/// The four recoverable failure classes a single item can hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InputNotFound,
    InvalidContent,
    UnsupportedParameter,
    ResourceFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::InputNotFound => "input not found",
            ErrorKind::InvalidContent => "invalid content",
            ErrorKind::UnsupportedParameter => "unsupported parameter",
            ErrorKind::ResourceFailure => "resource failure",
        };
        f.write_str(label)
    }
}

/// A recoverable failure of one item inside one transform
#[derive(Error, Debug, Clone)]
pub enum TransformError {
    #[error("input not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("{} is not a readable image: {source}", path.display())]
    InvalidContent {
        path: PathBuf,
        #[source]
        source: SharedSource,
    },

    #[error("unsupported {name}: {value}")]
    UnsupportedParameter { name: &'static str, value: String },

    #[error("failed to {operation} {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: SharedSource,
    },
}

impl TransformError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        TransformError::InputNotFound { path: path.into() }
    }

    pub fn invalid_content(
        path: impl Into<PathBuf>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        TransformError::InvalidContent {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn unsupported(name: &'static str, value: impl fmt::Display) -> Self {
        TransformError::UnsupportedParameter {
            name,
            value: value.to_string(),
        }
    }

    pub fn resource(
        path: impl Into<PathBuf>,
        operation: &'static str,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        TransformError::Resource {
            path: path.into(),
            operation,
            source: Arc::new(source),
        }
    }

    /// Map an I/O error on `path`, keeping "not found" distinct from other failures
    pub fn from_io(path: &Path, operation: &'static str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            TransformError::not_found(path)
        } else {
            TransformError::resource(path, operation, err)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::InputNotFound { .. } => ErrorKind::InputNotFound,
            TransformError::InvalidContent { .. } => ErrorKind::InvalidContent,
            TransformError::UnsupportedParameter { .. } => ErrorKind::UnsupportedParameter,
            TransformError::Resource { .. } => ErrorKind::ResourceFailure,
        }
    }
}

/// A batch-level failure. These indicate a defect, never bad input.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("worker for item {index} ({record}) panicked: {message}")]
    WorkerPanicked {
        index: usize,
        record: RecordId,
        message: String,
    },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("batch dispatcher failed: {0}")]
    Dispatcher(#[from] tokio::task::JoinError),
}

/// Session working-area errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("corrupt session manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SessionError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Settings file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors in the interactive command grammar
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unterminated quote in input")]
    UnterminatedQuote,

    #[error("value without a preceding --key: {0}")]
    DanglingValue(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("missing required option --{0}")]
    MissingOption(&'static str),

    #[error("invalid value for --{key}: {value}")]
    InvalidValue { key: String, value: String },
}
