//! Error types for the recflow core.
//!
//! Not-found and missing-input errors are raised before any stage runs.
//! Operation failures surface from inside the per-stage loop. Spill I/O
//! failures never reach callers; see [`SpillError`].

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, RecflowError>;

/// The main error type for recflow operations.
#[derive(Debug, Error)]
pub enum RecflowError {
    /// A stage id could not be resolved.
    #[error("Stage {0} not found in pipeline")]
    StageNotFound(String),

    /// An input id could not be resolved.
    #[error("Input {0} not found")]
    InputNotFound(String),

    /// A stage needs an input source but none is available.
    #[error("No input source for stage \"{operation}\"")]
    MissingInput {
        /// The operation that required input.
        operation: String,
    },

    /// An operation failed while being created or driven.
    #[error("Operation \"{operation}\" failed at stage {stage_id}: {source}")]
    Operation {
        /// The stage being executed.
        stage_id: String,
        /// The operation name.
        operation: String,
        /// The underlying failure reported by the operation.
        #[source]
        source: anyhow::Error,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecflowError {
    /// Creates an operation failure for a stage.
    #[must_use]
    pub fn operation(
        stage_id: impl Into<String>,
        operation: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::Operation {
            stage_id: stage_id.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Returns true for not-found errors (unknown stage or input).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::StageNotFound(_) | Self::InputNotFound(_))
    }

    /// Returns the stage id an operation failure belongs to.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&str> {
        match self {
            Self::Operation { stage_id, .. } => Some(stage_id),
            _ => None,
        }
    }
}

/// Storage-layer failure while spilling or re-hydrating a cached result.
///
/// Swallowed at the cache manager boundary: a failed spill keeps the
/// result in memory and a failed read is reported as a cache miss.
#[derive(Debug, Error)]
pub enum SpillError {
    /// The spill file could not be written.
    #[error("failed to write spill file {path}: {source}")]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The spill file could not be read.
    #[error("failed to read spill file {path}: {source}")]
    Read {
        /// Source path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A spilled record could not be (de)serialized.
    #[error("corrupt spill file {path}: {source}")]
    Corrupt {
        /// Source path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}
