//! Error types for the operation engine.

use devq_core::{CoreError, OperationId};
use devq_shell::ShellError;
use thiserror::Error;

use crate::OperationStatus;

/// Errors produced by the operation engine.
#[derive(Debug, Error)]
pub enum OpsError {
    /// A status change that the state machine does not allow.
    #[error("Operation {id} cannot go from {from} to {to}")]
    IllegalTransition {
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// No queued operation has this id.
    #[error("Unknown operation {id}")]
    UnknownOperation { id: OperationId },

    /// A device command could not be run.
    #[error(transparent)]
    Shell(#[from] ShellError),

    /// A core parsing or configuration error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The trash index could not be read or written.
    #[error("Trash index error for {path}: {message}")]
    TrashIndex { path: String, message: String },

    /// Running operations did not stop in time.
    #[error("{pending} operations did not stop in time")]
    StopTimeout { pending: usize },
}

impl OpsError {
    /// Create a trash index error.
    pub fn trash(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TrashIndex {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result alias for the operation engine.
pub type OpsResult<T> = Result<T, OpsError>;
