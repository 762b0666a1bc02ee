//! Command execution and output parsing for devq.
//!
//! This crate drives the external control binary for one device at a time,
//! streams its output line by line and turns those lines into typed
//! [`ProgressEvent`](devq_core::ProgressEvent)s.

mod adb;
mod error;
mod escape;
mod find_tree;
mod parse;
mod runner;

pub use adb::AdbRunner;
pub use error::ShellError;
pub use escape::escape_shell;
pub use find_tree::{TreeEntry, TreeEntryKind, find_tree_command, parse_tree_line, parse_tree_listing};
pub use parse::{LineKind, classify_line, parse_hash_line, parse_stats_line};
pub use runner::{
    CommandOutput, CommandRequest, CommandRunner, CommandStream, ExitOutcome, run_shell,
};

/// Buffer size of the per-command output line channel.
pub const LINE_CHANNEL_SIZE: usize = 256;
