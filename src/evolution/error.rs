//! Error types for the search engine.

use std::io;
use std::path::PathBuf;

use crate::schema::ConfigError;

use super::collaborators::BoxError;

/// Failure of a single generation or evaluation task.
///
/// Always handled at the fan-in: logged, and the slot contributes nothing.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("oracle request failed: {0}")]
    Oracle(#[source] BoxError),
    #[error("response could not be parsed: {0}")]
    Parse(#[source] BoxError),
    #[error("evaluation failed: {0}")]
    Evaluation(#[source] BoxError),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Checkpoint read/write failures.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt state in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A persisted population snapshot that cannot be restored.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("corrupt population state: {0}")]
pub struct CorruptStateError(pub String);

impl CorruptStateError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Errors that abort a search run.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("seed candidate could not be evaluated: {0}")]
    Seed(#[source] TaskError),
}
