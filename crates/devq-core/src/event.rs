//! Typed progress events produced from the control binary's output.

use serde::{Deserialize, Serialize};

/// Progress of the file currently being transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferAmount {
    /// Percentage of a file whose size is known.
    Percent(u8),
    /// Raw bytes of a stream whose size is unknown.
    Bytes(u64),
}

/// End-of-transfer statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    /// Path the summary line reports on.
    pub path: String,
    /// Number of files transferred.
    pub files_transferred: u64,
    /// Number of files skipped.
    pub files_skipped: u64,
    /// Total bytes moved; absent when nothing was moved.
    pub total_bytes: Option<u64>,
    /// Total time in seconds; absent when nothing was moved.
    pub total_time: Option<f64>,
    /// Average rate in MB/s; absent when nothing was moved.
    pub average_rate: Option<f64>,
}

/// Result of comparing one file's hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashOutcome {
    /// Hashes matched, or a hash was produced where no comparison applies.
    Match,
    /// Source and target hashes differ.
    Mismatch,
    /// The counterpart file does not exist.
    Missing,
}

/// A single typed event attached to one node of a progress tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// A transfer progress line.
    TransferProgress {
        path: String,
        /// Overall percentage; `None` when the size could not be estimated.
        total_percent: Option<u8>,
        /// Progress of the current file, if reported.
        current: Option<TransferAmount>,
    },
    /// Free-text error from the transfer tool.
    TransferError {
        path: Option<String>,
        message: String,
    },
    /// A `<tool>: <path>: <message>` error from a device shell command.
    ShellError { path: String, message: String },
    /// Hash computed or compared for one file.
    HashResult {
        path: String,
        outcome: HashOutcome,
        hash: Option<String>,
    },
    /// End-of-transfer statistics.
    Stats(StatsSummary),
    /// A line that matched no known shape.
    Unrecognized { line: String },
}

impl ProgressEvent {
    /// The path this event targets, if any. Path-less events go to the root.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::TransferProgress { path, .. }
            | Self::ShellError { path, .. }
            | Self::HashResult { path, .. } => Some(path),
            Self::TransferError { path, .. } => path.as_deref(),
            Self::Stats(stats) => Some(&stats.path),
            Self::Unrecognized { .. } => None,
        }
    }

    /// Collapse doubled separators in the event's path.
    pub fn normalize_path(&mut self) {
        let path = match self {
            Self::TransferProgress { path, .. }
            | Self::ShellError { path, .. }
            | Self::HashResult { path, .. } => path,
            Self::TransferError { path: Some(path), .. } => path,
            Self::Stats(stats) => &mut stats.path,
            Self::TransferError { path: None, .. } | Self::Unrecognized { .. } => return,
        };
        if path.contains("//") {
            *path = crate::path::collapse_separators(path);
        }
    }

    /// Whether this event reports a failure.
    pub fn is_error(&self) -> bool {
        match self {
            Self::TransferError { .. } | Self::ShellError { .. } | Self::Unrecognized { .. } => {
                true
            }
            Self::HashResult { outcome, .. } => *outcome != HashOutcome::Match,
            Self::TransferProgress { .. } | Self::Stats(_) => false,
        }
    }

    /// Whether this failure decides the outcome of the node it is attached to.
    ///
    /// Unrecognized output is kept visible but never fails an operation on
    /// its own.
    pub fn is_blocking_error(&self) -> bool {
        self.is_error() && !matches!(self, Self::Unrecognized { .. })
    }

    /// Whether this event is a hash comparison.
    pub fn is_hash(&self) -> bool {
        matches!(self, Self::HashResult { .. })
    }

    /// Human-readable message of an error event.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::TransferError { message, .. } | Self::ShellError { message, .. } => {
                Some(message)
            }
            Self::Unrecognized { line } => Some(line),
            Self::HashResult { outcome, .. } => match outcome {
                HashOutcome::Match => None,
                HashOutcome::Mismatch => Some("Hash mismatch"),
                HashOutcome::Missing => Some("File missing in target"),
            },
            Self::TransferProgress { .. } | Self::Stats(_) => None,
        }
    }

    /// Create a transfer error with an optional path.
    pub fn transfer_error(path: Option<String>, message: impl Into<String>) -> Self {
        Self::TransferError {
            path,
            message: message.into(),
        }
    }
}
