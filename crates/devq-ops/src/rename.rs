//! Renaming an item inside its folder.

use devq_core::{DeviceId, path};
use devq_shell::escape_shell;

use crate::EngineContext;
use crate::conflict::{ConflictResolution, resolve_target};
use crate::operation::{Operation, OperationTask, Outcome};

/// Rename `source` to `new_name` in the same folder.
pub fn rename_operation(
    device: DeviceId,
    source: impl Into<String>,
    new_name: impl Into<String>,
    resolution: Option<ConflictResolution>,
) -> Operation {
    let source = source.into();
    let new_name = new_name.into();
    let target = path::concat(path::parent(&source), &new_name);
    Operation::new(
        device,
        source,
        Some(target),
        OperationTask::Rename {
            new_name,
            resolution,
        },
    )
}

/// Check a new item name. Names must be non-empty and may not contain `/`.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name cannot be empty".to_string());
    }
    if name.contains('/') {
        return Err("Name cannot contain '/'".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("Invalid name: {name}"));
    }
    Ok(())
}

pub(crate) async fn execute(op: &Operation, ctx: &EngineContext) -> Outcome {
    let OperationTask::Rename {
        new_name,
        resolution,
    } = op.task()
    else {
        return Outcome::Failed(format!("{} is not a rename", op.operation_type()));
    };

    if let Err(message) = validate_name(new_name) {
        return Outcome::Failed(message);
    }

    let source = op.source();
    if path::file_name(source) == new_name {
        return Outcome::success();
    }

    let parent = path::parent(source);
    let resolution = resolution
        .unwrap_or_else(|| ConflictResolution::from_config(ctx.config().auto_resolve_conflicts));
    let target = match resolve_target(ctx, op, parent, new_name, "", resolution).await {
        Ok(target) => target,
        Err(conflict) => return Outcome::Failed(conflict.to_string()),
    };
    op.set_target(target.as_str());

    op.shell_step(
        ctx,
        format!("mv {} {}", escape_shell(source), escape_shell(&target)),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("photo.jpg").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("  ").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
    }

    #[test]
    fn test_rename_target_in_same_folder() {
        let op = rename_operation(DeviceId::new("dev"), "/sdcard/old.txt", "new.txt", None);
        assert_eq!(op.target().as_deref(), Some("/sdcard/new.txt"));
    }
}
