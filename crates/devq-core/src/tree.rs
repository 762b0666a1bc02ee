//! Hierarchical aggregation of progress events for one operation.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::event::{ProgressEvent, StatsSummary};
use crate::path;

/// Kind of a progress tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Folder,
}

/// Failed and completed units directly below a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub failed: usize,
    pub completed: usize,
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed > 0 {
            write!(f, "{} Failed, ", self.failed)?;
        }
        write!(f, "{} Completed", self.completed)
    }
}

/// A node of a progress tree.
///
/// Children are keyed by one path segment and only ever hold direct
/// children; intermediate folders are created when an event targets a
/// deeper path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressNode {
    path: String,
    kind: NodeKind,
    events: Vec<ProgressEvent>,
    children: IndexMap<String, ProgressNode>,
    latest_transfer: Option<ProgressEvent>,
}

impl ProgressNode {
    /// Create a node for `path`.
    pub fn new(path: impl Into<String>, kind: NodeKind) -> Self {
        let path = path::collapse_separators(&path.into());
        Self {
            path: path::trim_trailing(&path).to_string(),
            kind,
            events: Vec::new(),
            children: IndexMap::new(),
            latest_transfer: None,
        }
    }

    /// Path of this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Kind of this node.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Events attached directly to this node, in arrival order.
    pub fn events(&self) -> &[ProgressEvent] {
        &self.events
    }

    /// Direct children in creation order.
    pub fn children(&self) -> impl Iterator<Item = &ProgressNode> {
        self.children.values()
    }

    /// Direct child keyed by one path segment.
    pub fn child(&self, segment: &str) -> Option<&ProgressNode> {
        self.children.get(segment)
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Most recent transfer progress event seen anywhere in this tree.
    pub fn latest_transfer(&self) -> Option<&ProgressEvent> {
        self.latest_transfer.as_ref()
    }

    /// Add an event to the node its path selects.
    ///
    /// Events without a path, or with a path outside this node, are
    /// attached to this node. Returns `false` when the event was a duplicate
    /// and the tree did not change.
    pub fn add_event(&mut self, mut event: ProgressEvent) -> bool {
        event.normalize_path();
        if matches!(event, ProgressEvent::TransferProgress { .. }) {
            self.latest_transfer = Some(event.clone());
        }

        let relative = event
            .path()
            .and_then(|p| path::relative(p, &self.path))
            .map(str::to_string);

        match relative {
            Some(relative) if !relative.is_empty() => self.route(&relative, event),
            _ => self.push(event),
        }
    }

    fn route(&mut self, relative: &str, event: ProgressEvent) -> bool {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return self.push(event);
        }
        let (segment, rest) = match relative.split_once('/') {
            Some((segment, rest)) => (segment, rest.trim_start_matches('/')),
            None => (relative, ""),
        };
        let kind = if rest.is_empty() {
            NodeKind::File
        } else {
            NodeKind::Folder
        };

        let parent_path = self.path.clone();
        let child = self
            .children
            .entry(segment.to_string())
            .or_insert_with(|| ProgressNode::new(path::concat(&parent_path, segment), kind));

        if rest.is_empty() {
            child.push(event)
        } else {
            child.kind = NodeKind::Folder;
            child.route(rest, event)
        }
    }

    fn push(&mut self, event: ProgressEvent) -> bool {
        if self.events.contains(&event) {
            return false;
        }
        if matches!(event, ProgressEvent::TransferProgress { .. })
            && let Some(previous) = self
                .events
                .iter_mut()
                .rev()
                .find(|e| matches!(e, ProgressEvent::TransferProgress { .. }))
        {
            *previous = event;
            return true;
        }
        self.events.push(event);
        true
    }

    /// Find the node for `path`, if it was materialized.
    pub fn find(&self, target: &str) -> Option<&ProgressNode> {
        let relative = path::relative(target, &self.path)?;
        let mut node = self;
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    /// Whether this node has a failure attached directly to it.
    pub fn has_own_error(&self) -> bool {
        self.events.iter().any(ProgressEvent::is_blocking_error)
    }

    /// Whether this node or any descendant has a failure.
    pub fn has_failure(&self) -> bool {
        self.has_own_error() || self.children.values().any(ProgressNode::has_failure)
    }

    /// Whether real work was reported anywhere in this subtree.
    ///
    /// Error events alone do not count.
    pub fn has_partial_progress(&self) -> bool {
        self.events.iter().any(|event| match event {
            ProgressEvent::TransferProgress { .. } | ProgressEvent::HashResult { .. } => true,
            ProgressEvent::Stats(stats) => stats.files_transferred > 0,
            _ => false,
        }) || self.children.values().any(ProgressNode::has_partial_progress)
    }

    /// Count direct children, treating any failing subtree as one failure.
    pub fn counts(&self) -> StatusCounts {
        let failed = self.children.values().filter(|c| c.has_failure()).count();
        StatusCounts {
            failed,
            completed: self.children.len() - failed,
        }
    }

    /// Display status such as `2 Failed, 5 Completed`.
    pub fn status_summary(&self) -> String {
        self.counts().to_string()
    }

    /// First error message attached directly to this node.
    pub fn own_error_message(&self) -> Option<&str> {
        self.events
            .iter()
            .filter(|e| e.is_error())
            .find_map(ProgressEvent::message)
    }

    /// All error messages in this subtree, paired with their node path.
    pub fn error_messages(&self) -> Vec<(&str, &str)> {
        let mut messages: Vec<(&str, &str)> = self
            .events
            .iter()
            .filter(|e| e.is_error())
            .filter_map(|e| e.message().map(|m| (self.path.as_str(), m)))
            .collect();
        for child in self.children.values() {
            messages.extend(child.error_messages());
        }
        messages
    }

    /// Last statistics summary attached anywhere in this tree.
    pub fn stats(&self) -> Option<&StatsSummary> {
        let own = self.events.iter().rev().find_map(|e| match e {
            ProgressEvent::Stats(stats) => Some(stats),
            _ => None,
        });
        own.or_else(|| self.children.values().rev().find_map(ProgressNode::stats))
    }

    /// Number of file leaves in this subtree.
    pub fn file_count(&self) -> usize {
        if self.children.is_empty() {
            usize::from(self.kind == NodeKind::File)
        } else {
            self.children.values().map(ProgressNode::file_count).sum()
        }
    }

    /// Number of hash results in this subtree and how many matched.
    pub fn hash_counts(&self) -> (usize, usize) {
        let mut total = 0;
        let mut matched = 0;
        for event in &self.events {
            if event.is_hash() {
                total += 1;
                if !event.is_error() {
                    matched += 1;
                }
            }
        }
        for child in self.children.values() {
            let (t, m) = child.hash_counts();
            total += t;
            matched += m;
        }
        (total, matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TransferAmount;

    fn progress(path: &str, total: u8) -> ProgressEvent {
        ProgressEvent::TransferProgress {
            path: path.to_string(),
            total_percent: Some(total),
            current: Some(TransferAmount::Percent(total)),
        }
    }

    #[test]
    fn test_routes_to_root() {
        let mut root = ProgressNode::new("/sdcard/a.txt", NodeKind::File);
        assert!(root.add_event(progress("/sdcard/a.txt", 10)));
        assert_eq!(root.events().len(), 1);
        assert_eq!(root.child_count(), 0);
    }

    #[test]
    fn test_outside_path_goes_to_root() {
        let mut root = ProgressNode::new("/sdcard/Folder", NodeKind::Folder);
        root.add_event(ProgressEvent::transfer_error(
            Some("/data/x".into()),
            "denied",
        ));
        assert_eq!(root.events().len(), 1);
        assert!(root.has_own_error());
    }

    #[test]
    fn test_progress_replaces_previous() {
        let mut root = ProgressNode::new("/sdcard/Folder", NodeKind::Folder);
        root.add_event(progress("/sdcard/Folder/f", 10));
        root.add_event(progress("/sdcard/Folder/f", 50));
        let leaf = root.find("/sdcard/Folder/f").unwrap();
        assert_eq!(leaf.events(), &[progress("/sdcard/Folder/f", 50)]);
        assert_eq!(root.latest_transfer(), Some(&progress("/sdcard/Folder/f", 50)));
    }

    #[test]
    fn test_file_upgraded_to_folder() {
        let mut root = ProgressNode::new("/r", NodeKind::Folder);
        root.add_event(progress("/r/a", 1));
        assert_eq!(root.child("a").unwrap().kind(), NodeKind::File);
        root.add_event(progress("/r/a/b", 1));
        assert_eq!(root.child("a").unwrap().kind(), NodeKind::Folder);
    }

    #[test]
    fn test_counts_folder_once() {
        let mut root = ProgressNode::new("/r", NodeKind::Folder);
        root.add_event(ProgressEvent::ShellError {
            path: "/r/sub/one".into(),
            message: "Permission denied".into(),
        });
        root.add_event(ProgressEvent::ShellError {
            path: "/r/sub/two".into(),
            message: "Permission denied".into(),
        });
        root.add_event(progress("/r/ok", 100));

        assert_eq!(root.counts(), StatusCounts { failed: 1, completed: 1 });
        assert_eq!(root.status_summary(), "1 Failed, 1 Completed");
        assert!(!root.has_own_error());
        assert_eq!(root.error_messages().len(), 2);
    }

    #[test]
    fn test_unrecognized_does_not_fail() {
        let mut root = ProgressNode::new("/r", NodeKind::Folder);
        root.add_event(ProgressEvent::Unrecognized {
            line: "garbage".into(),
        });
        assert!(!root.has_failure());
        assert_eq!(root.own_error_message(), Some("garbage"));
    }

    #[test]
    fn test_doubled_separators_route_to_real_children() {
        let mut root = ProgressNode::new("/sdcard/Folder", NodeKind::Folder);
        root.add_event(progress("/sdcard/Folder//sub/f", 20));
        root.add_event(progress("/sdcard//Folder/sub//g", 30));

        assert_eq!(root.child_count(), 1);
        assert!(root.child("").is_none());
        let sub = root.child("sub").unwrap();
        assert_eq!(sub.kind(), NodeKind::Folder);
        assert_eq!(sub.child_count(), 2);
        assert_eq!(
            sub.child("f").unwrap().events(),
            &[progress("/sdcard/Folder/sub/f", 20)]
        );
        assert!(root.events().is_empty());
    }

    #[test]
    fn test_progress_replaces_across_errors() {
        let mut root = ProgressNode::new("/r", NodeKind::Folder);
        root.add_event(progress("/r/f", 10));
        root.add_event(ProgressEvent::ShellError {
            path: "/r/f".into(),
            message: "I/O error".into(),
        });
        root.add_event(progress("/r/f", 60));

        let leaf = root.find("/r/f").unwrap();
        assert_eq!(leaf.events().len(), 2);
        assert_eq!(leaf.events()[0], progress("/r/f", 60));
    }

    #[test]
    fn test_errors_alone_are_not_progress() {
        let mut root = ProgressNode::new("/r", NodeKind::Folder);
        root.add_event(ProgressEvent::ShellError {
            path: "/r/a".into(),
            message: "Permission denied".into(),
        });
        assert!(!root.has_partial_progress());

        root.add_event(progress("/r/sub/b", 100));
        assert!(root.has_partial_progress());
    }

    #[test]
    fn test_summary_without_failures() {
        let mut root = ProgressNode::new("/r", NodeKind::Folder);
        root.add_event(progress("/r/a", 100));
        root.add_event(progress("/r/b", 100));
        assert_eq!(root.status_summary(), "2 Completed");
        assert_eq!(root.file_count(), 2);
    }
}
