//! Recursive folder listing through `find -printf`.

use chrono::{DateTime, Utc};

use crate::escape_shell;

/// What a listed entry is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreeEntryKind {
    Directory,
    File {
        size: u64,
        modified: Option<DateTime<Utc>>,
    },
}

/// One entry of a folder listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: TreeEntryKind,
}

impl TreeEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, TreeEntryKind::Directory)
    }

    /// Size in bytes; zero for directories.
    pub fn size(&self) -> u64 {
        match self.kind {
            TreeEntryKind::File { size, .. } => size,
            TreeEntryKind::Directory => 0,
        }
    }
}

/// Shell line listing everything below `root`.
///
/// `max_depth` limits the listing; `Some(1)` lists direct children only.
pub fn find_tree_command(root: &str, max_depth: Option<u32>) -> String {
    let depth = max_depth
        .map(|d| format!(" -maxdepth {d}"))
        .unwrap_or_default();
    format!(
        "find {}{depth} -mindepth 1 \\( -type d -printf '/// %p /// d /// d ///\\n' \\) -o \\( -type f -printf '/// %p /// %s /// %T@ ///\\n' \\) 2>&1",
        escape_shell(root)
    )
}

/// Parse one `/// <path> /// <size|d> /// <epoch|d> ///` line.
pub fn parse_tree_line(line: &str) -> Option<TreeEntry> {
    let body = line.trim().strip_prefix("/// ")?.strip_suffix(" ///")?;
    let (rest, date) = body.rsplit_once(" /// ")?;
    let (path, size) = rest.rsplit_once(" /// ")?;

    if path.is_empty() {
        return None;
    }

    let kind = if size == "d" {
        TreeEntryKind::Directory
    } else {
        TreeEntryKind::File {
            size: size.parse().ok()?,
            modified: parse_epoch(date),
        }
    };

    Some(TreeEntry {
        path: path.to_string(),
        kind,
    })
}

/// Parse a full listing, skipping lines that are not entries.
pub fn parse_tree_listing(output: &str) -> Vec<TreeEntry> {
    output.lines().filter_map(parse_tree_line).collect()
}

fn parse_epoch(text: &str) -> Option<DateTime<Utc>> {
    let (secs, fraction) = text.split_once('.').unwrap_or((text, ""));
    let secs: i64 = secs.parse().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        let digits: String = fraction.chars().take(9).collect();
        let scale = 10u32.pow(9 - digits.len() as u32);
        digits.parse::<u32>().ok()? * scale
    };
    DateTime::from_timestamp(secs, nanos)
}
