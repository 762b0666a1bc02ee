//! Target-name conflict detection and resolution.

use devq_core::{DeviceId, duplicate_name, path};
use devq_shell::{escape_shell, find_tree_command, parse_tree_listing};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::trash::failure_text;
use crate::{EngineContext, Operation};

/// A conflict detected before an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The source path being operated on.
    pub source: String,
    /// The destination path where the conflict exists.
    pub destination: String,
    pub kind: ConflictKind,
    /// Device output explaining the conflict, if any.
    pub detail: Option<String>,
}

impl Conflict {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, kind: ConflictKind) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            kind,
            detail: None,
        }
    }

    /// Attach the device output that explains the conflict.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.destination)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// The kind of conflict encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Something already exists at the destination.
    TargetExists,
    /// Cannot move or copy a directory into itself.
    SourceIsAncestor,
    /// Source and destination are the same item.
    SameItem,
    /// The target folder could not be listed, so clashes are unknown.
    ListingFailed,
    /// The existing item could not be removed for an overwrite.
    RemoveFailed,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetExists => write!(f, "Target already exists"),
            Self::SourceIsAncestor => write!(f, "Cannot copy or move a directory into itself"),
            Self::SameItem => write!(f, "Source and destination are the same item"),
            Self::ListingFailed => write!(f, "Could not list target folder"),
            Self::RemoveFailed => write!(f, "Could not replace existing target"),
        }
    }
}

/// How to resolve a target-name conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConflictResolution {
    /// Pick a free name with a duplicate counter.
    #[default]
    AutoRename,
    /// Replace the existing item.
    Overwrite,
    /// Fail the operation.
    Abort,
}

impl ConflictResolution {
    /// Resolution used when the caller did not choose one.
    pub fn from_config(auto_resolve: bool) -> Self {
        if auto_resolve { Self::AutoRename } else { Self::Abort }
    }
}

/// Final name chosen for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub name: String,
    /// The existing item must be removed first.
    pub overwrite: bool,
}

/// Choose the target name among `existing` sibling names.
pub fn resolve_name(
    existing: &[String],
    name: &str,
    copy_suffix: &str,
    resolution: ConflictResolution,
) -> Result<ResolvedName, ConflictKind> {
    if !existing.iter().any(|sibling| sibling == name) {
        return Ok(ResolvedName {
            name: name.to_string(),
            overwrite: false,
        });
    }

    match resolution {
        ConflictResolution::AutoRename => Ok(ResolvedName {
            name: duplicate_name(existing, name, copy_suffix),
            overwrite: false,
        }),
        ConflictResolution::Overwrite => Ok(ResolvedName {
            name: name.to_string(),
            overwrite: true,
        }),
        ConflictResolution::Abort => Err(ConflictKind::TargetExists),
    }
}

/// Check that `source` can be placed into `target_parent`.
pub fn check_placement(source: &str, target_parent: &str) -> Result<(), ConflictKind> {
    let source = path::trim_trailing(source);
    let target_parent = path::trim_trailing(target_parent);
    if target_parent == source || path::is_descendant(target_parent, source) {
        return Err(ConflictKind::SourceIsAncestor);
    }
    Ok(())
}

/// Names of the entries directly inside `parent` on `device`.
///
/// A listing that exits nonzero without producing a single entry is an
/// error; an empty folder lists cleanly.
pub(crate) async fn list_names(
    ctx: &EngineContext,
    device: &DeviceId,
    parent: &str,
    cancel: CancellationToken,
) -> Result<Vec<String>, String> {
    let output = ctx
        .shell(device, find_tree_command(parent, Some(1)), cancel)
        .await
        .map_err(|e| e.to_string())?;
    let entries = parse_tree_listing(&output.stdout);
    if entries.is_empty() && !output.success() {
        let printed = output.stdout.trim();
        let message = if output.stderr.trim().is_empty() && !printed.is_empty() {
            path::collapse_separators(printed)
        } else {
            failure_text(&output)
        };
        tracing::warn!(target: "devq::queue", %device, parent, error = message.as_str(), "could not list target folder");
        return Err(message);
    }
    Ok(entries
        .iter()
        .map(|entry| path::file_name(&entry.path).to_string())
        .collect())
}

/// Resolve the final target path for placing `name` into `target_parent`,
/// removing an existing item first when overwriting.
pub(crate) async fn resolve_target(
    ctx: &EngineContext,
    op: &Operation,
    target_parent: &str,
    name: &str,
    copy_suffix: &str,
    resolution: ConflictResolution,
) -> Result<String, Conflict> {
    let device = op.device();
    let desired = path::concat(target_parent, name);
    let siblings = list_names(ctx, device, target_parent, op.cancel_token())
        .await
        .map_err(|detail| {
            Conflict::new(op.source(), target_parent, ConflictKind::ListingFailed).with_detail(detail)
        })?;

    let resolved = resolve_name(&siblings, name, copy_suffix, resolution)
        .map_err(|kind| Conflict::new(op.source(), desired.as_str(), kind))?;
    let target = path::concat(target_parent, &resolved.name);

    if resolved.overwrite {
        tracing::debug!(target: "devq::queue", %device, target = target.as_str(), "removing existing target");
        let removal = ctx
            .shell(device, format!("rm -rf {}", escape_shell(&target)), op.cancel_token())
            .await;
        let detail = match removal {
            Ok(output) if output.success() => None,
            Ok(output) => Some(failure_text(&output)),
            Err(e) => Some(e.to_string()),
        };
        if let Some(detail) = detail {
            return Err(
                Conflict::new(op.source(), target.as_str(), ConflictKind::RemoveFailed).with_detail(detail),
            );
        }
    }
    Ok(target)
}
