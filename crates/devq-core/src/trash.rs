//! Trash sidecar entries.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::path;

/// Date format used inside sidecar files.
pub const TRASH_DATE_FORMAT: &str = "%Y.%m.%d-%H:%M:%S";

/// Metadata for one recycled item, stored as `name|original_path|date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashEntry {
    /// Name of the item inside the trash root.
    pub recycle_name: String,
    /// Full path the item had before it was recycled.
    pub original_path: String,
    /// When the item was recycled. `None` is written as `?`.
    pub deleted_at: Option<NaiveDateTime>,
}

impl TrashEntry {
    /// Create an entry, truncating the timestamp to whole seconds.
    pub fn new(
        recycle_name: impl Into<String>,
        original_path: impl Into<String>,
        deleted_at: Option<NaiveDateTime>,
    ) -> Self {
        Self {
            recycle_name: recycle_name.into(),
            original_path: original_path.into(),
            deleted_at: deleted_at.and_then(|d| d.with_nanosecond(0)),
        }
    }

    /// Path of this entry's sidecar file under `trash_root`.
    pub fn sidecar_path(&self, trash_root: &str, index_suffix: &str) -> String {
        Self::sidecar_path_for(&self.recycle_name, trash_root, index_suffix)
    }

    /// Sidecar path of an arbitrary recycle name.
    pub fn sidecar_path_for(recycle_name: &str, trash_root: &str, index_suffix: &str) -> String {
        path::concat(trash_root, &format!(".{recycle_name}{index_suffix}"))
    }

    /// Path of the recycled item inside `trash_root`.
    pub fn recycled_path(&self, trash_root: &str) -> String {
        path::concat(trash_root, &self.recycle_name)
    }

    /// Directory the item is restored into.
    pub fn restore_parent(&self) -> &str {
        match path::parent(&self.original_path) {
            "" => &self.original_path,
            parent => parent,
        }
    }

    /// Name the item had before it was recycled.
    pub fn original_name(&self) -> &str {
        path::file_name(&self.original_path)
    }
}

impl fmt::Display for TrashEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|", self.recycle_name, self.original_path)?;
        match self.deleted_at {
            Some(date) => write!(f, "{}", date.format(TRASH_DATE_FORMAT)),
            None => f.write_str("?"),
        }
    }
}

impl FromStr for TrashEntry {
    type Err = CoreError;

    /// Parse a sidecar line. An unparsable date is kept as unknown.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (recycle_name, rest) = line
            .split_once('|')
            .ok_or_else(|| CoreError::malformed_entry(line))?;
        let (original_path, date) = rest
            .rsplit_once('|')
            .ok_or_else(|| CoreError::malformed_entry(line))?;

        if recycle_name.is_empty() || original_path.is_empty() {
            return Err(CoreError::malformed_entry(line));
        }

        let deleted_at = NaiveDateTime::parse_from_str(date.trim(), TRASH_DATE_FORMAT).ok();
        Ok(Self {
            recycle_name: recycle_name.to_string(),
            original_path: original_path.to_string(),
            deleted_at,
        })
    }
}
