//! Push and pull through the control binary's file sync.

use std::path::PathBuf;

use devq_core::{DeviceId, path};
use devq_shell::CommandRequest;

use crate::EngineContext;
use crate::operation::{Operation, OperationTask, Outcome};

/// Push the host file or folder `local` into the device folder `target_parent`.
pub fn push_operation(
    device: DeviceId,
    local: impl Into<PathBuf>,
    target_parent: impl Into<String>,
) -> Operation {
    let local = local.into();
    let target_parent = target_parent.into();
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = path::concat(&target_parent, &name);
    Operation::new(
        device,
        local.display().to_string(),
        Some(target),
        OperationTask::Push { local },
    )
}

/// Pull the device item `source` into the host folder `local_target`.
pub fn pull_operation(
    device: DeviceId,
    source: impl Into<String>,
    local_target: impl Into<PathBuf>,
) -> Operation {
    let local_target = local_target.into();
    Operation::new(
        device,
        source,
        Some(local_target.display().to_string()),
        OperationTask::Pull { local_target },
    )
}

fn transfer_args(verb: &str, keep_date: bool, from: String, to: String) -> Vec<String> {
    let mut args = vec![verb.to_string()];
    if keep_date {
        args.push("-a".to_string());
    }
    args.push(from);
    args.push(to);
    args
}

pub(crate) async fn execute(op: &Operation, ctx: &EngineContext) -> Outcome {
    let keep_date = ctx.config().keep_date_modified;
    let args = match op.task() {
        OperationTask::Push { local } => {
            let Some(target) = op.target() else {
                return Outcome::Failed("Push has no target".to_string());
            };
            transfer_args(
                "push",
                keep_date,
                local.display().to_string(),
                path::parent(&target).to_string(),
            )
        }
        OperationTask::Pull { local_target } => transfer_args(
            "pull",
            keep_date,
            op.source().to_string(),
            local_target.display().to_string(),
        ),
        _ => return Outcome::Failed(format!("{} is not a transfer", op.operation_type())),
    };

    op.stream(ctx, CommandRequest::adb(args)).await
}
