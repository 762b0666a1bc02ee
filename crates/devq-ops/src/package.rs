//! Package install and uninstall.

use std::path::PathBuf;

use devq_core::{DeviceId, ProgressEvent};
use devq_shell::{CommandRequest, escape_shell};

use crate::EngineContext;
use crate::operation::{Operation, OperationTask, Outcome};

/// Install an APK that is already on the device.
pub fn install_package_operation(device: DeviceId, device_path: impl Into<String>) -> Operation {
    Operation::new(
        device,
        device_path,
        None,
        OperationTask::InstallPackage { host_path: None },
    )
}

/// Install an APK from the host through `adb install`.
pub fn install_host_package_operation(device: DeviceId, host_path: impl Into<PathBuf>) -> Operation {
    let host_path = host_path.into();
    Operation::new(
        device,
        host_path.display().to_string(),
        None,
        OperationTask::InstallPackage {
            host_path: Some(host_path),
        },
    )
}

/// Uninstall the package named `package`.
pub fn uninstall_package_operation(device: DeviceId, package: impl Into<String>) -> Operation {
    Operation::new(device, package, None, OperationTask::UninstallPackage)
}

/// Classify package manager output.
///
/// `Failure [...]` and `Error: ...` lines become errors on the operation
/// root; everything else is informational and dropped.
pub fn classify_package_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();
    if line.starts_with("Failure") || line.starts_with("Error") {
        Some(ProgressEvent::transfer_error(None, line))
    } else {
        None
    }
}

pub(crate) async fn execute(op: &Operation, ctx: &EngineContext) -> Outcome {
    match op.task() {
        OperationTask::InstallPackage {
            host_path: Some(host_path),
        } => {
            let request = CommandRequest::adb([
                "install".to_string(),
                "-r".to_string(),
                host_path.display().to_string(),
            ]);
            op.stream_with(ctx, request, classify_package_line).await
        }
        OperationTask::InstallPackage { host_path: None } => {
            let line = format!("pm install -r -d {}", escape_shell(op.source()));
            op.shell_step_with(ctx, line, classify_package_line).await
        }
        OperationTask::UninstallPackage => {
            let line = format!("pm uninstall {}", escape_shell(op.source()));
            op.shell_step_with(ctx, line, classify_package_line).await
        }
        _ => Outcome::Failed(format!("{} is not a package operation", op.operation_type())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_package_line() {
        assert_eq!(classify_package_line("Success"), None);
        assert_eq!(classify_package_line("Performing Streamed Install"), None);
        assert_eq!(
            classify_package_line("Failure [INSTALL_FAILED_ALREADY_EXISTS]"),
            Some(ProgressEvent::transfer_error(
                None,
                "Failure [INSTALL_FAILED_ALREADY_EXISTS]"
            ))
        );
    }
}
