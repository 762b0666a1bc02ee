//! Device-side copy, move, recycle and restore.

use chrono::{Local, Utc};
use devq_core::{DeviceId, TrashEntry, path};
use devq_shell::escape_shell;
use tracing::{debug, warn};

use crate::conflict::{
    Conflict, ConflictKind, ConflictResolution, check_placement, resolve_target,
};
use crate::operation::{Operation, OperationTask, Outcome};
use crate::progress::OperationStatus;
use crate::{EngineContext, TrashIndex};

/// Copy `source` into the folder `target_parent`.
///
/// A name clash is resolved with `resolution`, or with the configured default
/// when `None`.
pub fn copy_operation(
    device: DeviceId,
    source: impl Into<String>,
    target_parent: impl Into<String>,
    resolution: Option<ConflictResolution>,
) -> Operation {
    let target_parent = target_parent.into();
    Operation::new(
        device,
        source,
        None,
        OperationTask::Copy {
            target_parent,
            resolution,
        },
    )
}

/// Move `source` into the folder `target_parent`.
pub fn move_operation(
    device: DeviceId,
    source: impl Into<String>,
    target_parent: impl Into<String>,
    resolution: Option<ConflictResolution>,
) -> Operation {
    let target_parent = target_parent.into();
    Operation::new(
        device,
        source,
        None,
        OperationTask::Move {
            target_parent,
            resolution,
        },
    )
}

/// Move `source` into the trash root and record a sidecar for it.
pub fn recycle_operation(device: DeviceId, source: impl Into<String>) -> Operation {
    Operation::new(device, source, None, OperationTask::Recycle)
}

/// Move a recycled item back to where it came from.
pub fn restore_operation(device: DeviceId, entry: TrashEntry, trash_root: &str) -> Operation {
    let source = entry.recycled_path(trash_root);
    Operation::new(device, source, None, OperationTask::Restore { entry })
}

/// Where an item goes and how its name is chosen.
struct Placement<'a> {
    target_parent: String,
    name: String,
    copy_suffix: &'a str,
    resolution: ConflictResolution,
    command: &'static str,
}

fn placement<'a>(op: &Operation, ctx: &'a EngineContext) -> Option<Placement<'a>> {
    let config = ctx.config();
    let default = ConflictResolution::from_config(config.auto_resolve_conflicts);
    let name = path::file_name(op.source()).to_string();

    let placement = match op.task() {
        OperationTask::Copy {
            target_parent,
            resolution,
        } => Placement {
            target_parent: target_parent.clone(),
            name,
            copy_suffix: &config.copy_suffix,
            resolution: resolution.unwrap_or(default),
            command: "cp -r",
        },
        OperationTask::Move {
            target_parent,
            resolution,
        } => Placement {
            target_parent: target_parent.clone(),
            name,
            copy_suffix: "",
            resolution: resolution.unwrap_or(default),
            command: "mv",
        },
        OperationTask::Recycle => Placement {
            target_parent: config.trash_root.clone(),
            name: format!("{{{}}}", Utc::now().timestamp_millis()),
            copy_suffix: "",
            resolution: ConflictResolution::AutoRename,
            command: "mv",
        },
        OperationTask::Restore { entry } => Placement {
            target_parent: entry.restore_parent().to_string(),
            name: entry.original_name().to_string(),
            copy_suffix: "",
            resolution: ConflictResolution::AutoRename,
            command: "mv",
        },
        _ => return None,
    };
    Some(placement)
}

pub(crate) async fn execute(op: &Operation, ctx: &EngineContext) -> Outcome {
    let Some(placement) = placement(op, ctx) else {
        return Outcome::Failed(format!("{} is not a move operation", op.operation_type()));
    };
    let source = op.source();

    if matches!(op.task(), OperationTask::Copy { .. } | OperationTask::Move { .. }) {
        if let Err(kind) = check_placement(source, &placement.target_parent) {
            return conflict(Conflict::new(source, placement.target_parent.as_str(), kind));
        }
        if matches!(op.task(), OperationTask::Move { .. })
            && path::parent(source) == path::trim_trailing(&placement.target_parent)
        {
            return conflict(Conflict::new(
                source,
                placement.target_parent.as_str(),
                ConflictKind::SameItem,
            ));
        }
    }

    if matches!(op.task(), OperationTask::Recycle | OperationTask::Restore { .. }) {
        let line = format!("mkdir -p {}", escape_shell(&placement.target_parent));
        match ctx.shell(op.device(), line, op.cancel_token()).await {
            Ok(output) if output.success() => {}
            Ok(output) if output.canceled => return Outcome::Canceled,
            Ok(output) => {
                return Outcome::Failed(format!(
                    "Could not create {}: {}",
                    placement.target_parent,
                    path::collapse_separators(output.stderr.trim())
                ));
            }
            Err(e) => return Outcome::Failed(e.to_string()),
        }
    }

    let target = match resolve_target(
        ctx,
        op,
        &placement.target_parent,
        &placement.name,
        placement.copy_suffix,
        placement.resolution,
    )
    .await
    {
        Ok(target) => target,
        Err(c) => return conflict(c),
    };
    op.set_target(target.as_str());

    op.shell_step(
        ctx,
        format!(
            "{} {} {}",
            placement.command,
            escape_shell(source),
            escape_shell(&target)
        ),
    )
    .await
}

fn conflict(conflict: Conflict) -> Outcome {
    debug!(target: "devq::queue", source = conflict.source.as_str(), kind = %conflict.kind, "conflict");
    Outcome::Failed(conflict.to_string())
}

/// Trash bookkeeping once a recycle or restore has finished.
pub(crate) async fn on_finished(op: &Operation, ctx: &EngineContext, status: OperationStatus) {
    let index = TrashIndex::new(ctx, op.device());

    match (op.task(), status) {
        (OperationTask::Recycle, OperationStatus::Completed) => {
            let Some(target) = op.target() else { return };
            let entry = TrashEntry::new(
                path::file_name(&target),
                op.source(),
                Some(Local::now().naive_local()),
            );
            if let Err(e) = index.put(&entry).await {
                warn!(target: "devq::trash", id = %op.id(), error = %e, "could not record recycled item");
            }
        }
        (OperationTask::Recycle, OperationStatus::Failed) => {
            let Some(target) = op.target() else { return };
            debug!(target: "devq::trash", id = %op.id(), target = target.as_str(), "removing partial recycle");
            let _ = ctx
                .shell(
                    op.device(),
                    format!("rm -rf {}", escape_shell(&target)),
                    op.cancel_token(),
                )
                .await;
            let _ = index.remove(path::file_name(&target)).await;
        }
        (OperationTask::Restore { entry }, OperationStatus::Completed) => {
            if let Err(e) = index.remove(&entry.recycle_name).await {
                warn!(target: "devq::trash", id = %op.id(), error = %e, "could not remove sidecar");
            }
        }
        _ => {}
    }
}
