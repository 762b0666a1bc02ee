//! Permanent deletion.

use devq_core::{DeviceId, path};
use devq_shell::escape_shell;
use tracing::warn;

use crate::operation::{Operation, OperationTask, Outcome};
use crate::progress::OperationStatus;
use crate::{EngineContext, TrashIndex};

/// Delete `source` and everything below it.
pub fn delete_operation(device: DeviceId, source: impl Into<String>) -> Operation {
    Operation::new(device, source, None, OperationTask::Delete)
}

pub(crate) async fn execute(op: &Operation, ctx: &EngineContext) -> Outcome {
    op.shell_step(ctx, format!("rm -rf {}", escape_shell(op.source())))
        .await
}

/// Drop the sidecar of an item deleted from the trash root.
pub(crate) async fn on_finished(op: &Operation, ctx: &EngineContext, status: OperationStatus) {
    if status != OperationStatus::Completed {
        return;
    }
    let trash_root = path::trim_trailing(&ctx.config().trash_root);
    if path::parent(op.source()) != trash_root {
        return;
    }
    let name = path::file_name(op.source());
    if let Err(e) = TrashIndex::new(ctx, op.device()).remove(name).await {
        warn!(target: "devq::trash", id = %op.id(), error = %e, "could not remove sidecar");
    }
}
