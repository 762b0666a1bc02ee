//! Core types for devq.
//!
//! This crate provides the data structures shared by the shell runner and the
//! operation engine: identifiers, remote path helpers, typed progress events,
//! the per-operation progress tree, duplicate-name resolution, trash sidecar
//! entries and the engine configuration.

mod config;
mod device;
mod error;
mod event;
mod naming;
pub mod path;
mod trash;
mod tree;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use device::{DeviceId, OperationId};
pub use error::CoreError;
pub use event::{HashOutcome, ProgressEvent, StatsSummary, TransferAmount};
pub use naming::{duplicate_name, existing_indexes, split_extension};
pub use trash::{TRASH_DATE_FORMAT, TrashEntry};
pub use tree::{NodeKind, ProgressNode, StatusCounts};
