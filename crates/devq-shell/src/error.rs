//! Errors raised while running commands.

use std::io;

use thiserror::Error;

/// Errors produced by a [`CommandRunner`](crate::CommandRunner).
#[derive(Debug, Error)]
pub enum ShellError {
    /// The control binary could not be found.
    #[error("{program} not found")]
    NotFound { program: String },

    /// The process could not be started.
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Reading output or waiting for the process failed.
    #[error("I/O error while running command: {source}")]
    Io {
        #[source]
        source: io::Error,
    },

    /// The runner went away before reporting an exit status.
    #[error("Command runner stopped before reporting an exit status")]
    Disconnected,
}

impl ShellError {
    /// Classify a spawn failure.
    pub fn launch(program: impl Into<String>, source: io::Error) -> Self {
        let program = program.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound { program }
        } else {
            Self::Launch { program, source }
        }
    }

    /// Wrap an I/O error.
    pub fn io(source: io::Error) -> Self {
        Self::Io { source }
    }
}
