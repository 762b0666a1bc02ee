//! Operation engine for devq.
//!
//! This crate turns user requests into queued [`Operation`]s, dispatches them
//! one device at a time through a [`CommandRunner`](devq_shell::CommandRunner),
//! folds their output into progress trees and keeps the on-device trash
//! index in step with recycle, restore and delete.

mod conflict;
mod context;
mod delete;
mod error;
mod move_op;
mod operation;
mod package;
mod progress;
mod queue;
mod rename;
mod timestamp;
mod transfer;
mod trash;
mod validate;

pub use conflict::{Conflict, ConflictKind, ConflictResolution, ResolvedName, check_placement, resolve_name};
pub use context::{EngineContext, QueueEvent, ViewLocation};
pub use delete::delete_operation;
pub use error::{OpsError, OpsResult};
pub use move_op::{copy_operation, move_operation, recycle_operation, restore_operation};
pub use operation::Operation;
pub use package::{
    classify_package_line, install_host_package_operation, install_package_operation,
    uninstall_package_operation,
};
pub use progress::{OperationStatus, OperationType, ProgressSnapshot, QueueCounts};
pub use queue::OperationQueue;
pub use rename::{rename_operation, validate_name};
pub use timestamp::{change_timestamp_operation, date_from_name};
pub use transfer::{pull_operation, push_operation};
pub use trash::{TrashIndex, TrashItem};
pub use validate::validate_operation;
