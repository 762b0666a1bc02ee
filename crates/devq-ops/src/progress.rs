//! Operation kinds, statuses and progress snapshots.

use std::fmt;

use devq_core::StatusCounts;
use serde::{Deserialize, Serialize};

/// The kind of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Copy,
    Move,
    Recycle,
    Restore,
    Delete,
    Rename,
    InstallPackage,
    UninstallPackage,
    ChangeTimestamp,
    Validate,
    Push,
    Pull,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Recycle => write!(f, "Recycle"),
            Self::Restore => write!(f, "Restore"),
            Self::Delete => write!(f, "Delete"),
            Self::Rename => write!(f, "Rename"),
            Self::InstallPackage => write!(f, "Install package"),
            Self::UninstallPackage => write!(f, "Uninstall package"),
            Self::ChangeTimestamp => write!(f, "Change timestamp"),
            Self::Validate => write!(f, "Validate"),
            Self::Push => write!(f, "Push"),
            Self::Pull => write!(f, "Pull"),
        }
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Waiting,
    InProgress,
    Completed,
    Canceled,
    Failed,
}

impl OperationStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting"),
            Self::InProgress => write!(f, "In progress"),
            Self::Completed => write!(f, "Completed"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time view of an operation's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: OperationStatus,
    /// Human summary such as `2 Failed, 5 Completed`.
    pub status_text: String,
    /// Overall percentage reported by the transfer tool.
    pub total_percent: Option<u8>,
    /// File currently being transferred.
    pub current_path: Option<String>,
    /// Failed and completed units below the operation root.
    pub counts: StatusCounts,
    /// Failure message of a failed operation.
    pub message: Option<String>,
}

impl ProgressSnapshot {
    /// Fraction of the operation that is done, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.status.is_terminal() {
            1.0
        } else {
            self.total_percent.map_or(0.0, |pct| f64::from(pct.min(100)) / 100.0)
        }
    }
}

/// Number of queued operations per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub canceled: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Count one operation.
    pub fn add(&mut self, status: OperationStatus) {
        match status {
            OperationStatus::Waiting => self.waiting += 1,
            OperationStatus::InProgress => self.in_progress += 1,
            OperationStatus::Completed => self.completed += 1,
            OperationStatus::Canceled => self.canceled += 1,
            OperationStatus::Failed => self.failed += 1,
        }
    }

    /// Total number of operations counted.
    pub fn total(&self) -> usize {
        self.waiting + self.in_progress + self.completed + self.canceled + self.failed
    }

    /// Operations that have not reached a terminal state.
    pub fn pending(&self) -> usize {
        self.waiting + self.in_progress
    }
}

impl fmt::Display for QueueCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} waiting, {} in progress, {} completed, {} canceled, {} failed",
            self.waiting, self.in_progress, self.completed, self.canceled, self.failed
        )
    }
}
