//! A queued operation and its state machine.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Local, NaiveDateTime};
use devq_core::{DeviceId, NodeKind, OperationId, ProgressEvent, ProgressNode, TrashEntry, path};
use devq_shell::{CommandRequest, ExitOutcome, classify_line};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::conflict::ConflictResolution;
use crate::error::{OpsError, OpsResult};
use crate::progress::{OperationStatus, OperationType, ProgressSnapshot};
use crate::{EngineContext, QueueEvent};
use crate::{delete, move_op, package, rename, timestamp, transfer, validate};

/// Variant-specific details of an operation.
#[derive(Debug, Clone)]
pub(crate) enum OperationTask {
    Copy {
        target_parent: String,
        resolution: Option<ConflictResolution>,
    },
    Move {
        target_parent: String,
        resolution: Option<ConflictResolution>,
    },
    Recycle,
    Restore {
        entry: TrashEntry,
    },
    Delete,
    Rename {
        new_name: String,
        resolution: Option<ConflictResolution>,
    },
    InstallPackage {
        host_path: Option<PathBuf>,
    },
    UninstallPackage,
    ChangeTimestamp {
        time: Option<NaiveDateTime>,
    },
    Validate {
        target: String,
    },
    Push {
        local: PathBuf,
    },
    Pull {
        local_target: PathBuf,
    },
}

impl OperationTask {
    fn operation_type(&self) -> OperationType {
        match self {
            Self::Copy { .. } => OperationType::Copy,
            Self::Move { .. } => OperationType::Move,
            Self::Recycle => OperationType::Recycle,
            Self::Restore { .. } => OperationType::Restore,
            Self::Delete => OperationType::Delete,
            Self::Rename { .. } => OperationType::Rename,
            Self::InstallPackage { .. } => OperationType::InstallPackage,
            Self::UninstallPackage => OperationType::UninstallPackage,
            Self::ChangeTimestamp { .. } => OperationType::ChangeTimestamp,
            Self::Validate { .. } => OperationType::Validate,
            Self::Push { .. } => OperationType::Push,
            Self::Pull { .. } => OperationType::Pull,
        }
    }

    fn root_kind(&self) -> NodeKind {
        match self {
            Self::Rename { .. }
            | Self::InstallPackage { .. }
            | Self::UninstallPackage
            | Self::ChangeTimestamp { .. } => NodeKind::File,
            _ => NodeKind::Folder,
        }
    }
}

/// How the commands of an operation ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The last command exited.
    Exited(ExitOutcome),
    /// The operation could not run; the message explains why.
    Failed(String),
    /// The operation stopped because it was canceled.
    Canceled,
}

impl Outcome {
    /// A successful exit with no output.
    pub(crate) fn success() -> Self {
        Self::Exited(ExitOutcome {
            code: Some(0),
            ..Default::default()
        })
    }
}

#[derive(Debug)]
struct OperationState {
    status: OperationStatus,
    tree: ProgressNode,
    target: Option<String>,
    message: Option<String>,
    started_at: Option<DateTime<Local>>,
    finished_at: Option<DateTime<Local>>,
}

/// One user request bound to one device.
///
/// Operations are created by the builder functions, handed to an
/// [`OperationQueue`](crate::OperationQueue) and driven by its per-device
/// worker. Every status change is published as a
/// [`QueueEvent::StatusChanged`].
#[derive(Debug)]
pub struct Operation {
    id: OperationId,
    device: DeviceId,
    op_type: OperationType,
    source: String,
    task: OperationTask,
    created_at: DateTime<Local>,
    state: Mutex<OperationState>,
    cancel: CancellationToken,
    status_tx: watch::Sender<OperationStatus>,
    events: OnceLock<broadcast::Sender<QueueEvent>>,
}

impl Operation {
    pub(crate) fn new(
        device: DeviceId,
        source: impl Into<String>,
        target: Option<String>,
        task: OperationTask,
    ) -> Self {
        let source = source.into();
        let root = match &task {
            OperationTask::Push { .. } => target.clone().unwrap_or_else(|| source.clone()),
            _ => source.clone(),
        };
        let (status_tx, _) = watch::channel(OperationStatus::Waiting);

        Self {
            id: OperationId::next(),
            device,
            op_type: task.operation_type(),
            source,
            created_at: Local::now(),
            state: Mutex::new(OperationState {
                status: OperationStatus::Waiting,
                tree: ProgressNode::new(root, task.root_kind()),
                target,
                message: None,
                started_at: None,
                finished_at: None,
            }),
            task,
            cancel: CancellationToken::new(),
            status_tx,
            events: OnceLock::new(),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn operation_type(&self) -> OperationType {
        self.op_type
    }

    /// Device path (or package name, or host path for pushes) acted upon.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Destination path, final once conflicts are resolved.
    pub fn target(&self) -> Option<String> {
        self.lock().target.clone()
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Local>> {
        self.lock().finished_at
    }

    pub fn status(&self) -> OperationStatus {
        self.lock().status
    }

    /// Failure message of a failed operation.
    pub fn message(&self) -> Option<String> {
        self.lock().message.clone()
    }

    /// Copy of the progress tree.
    pub fn tree(&self) -> ProgressNode {
        self.lock().tree.clone()
    }

    /// Current progress snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        self.build_snapshot(&state)
    }

    /// Request cancellation.
    ///
    /// A waiting operation is canceled at once. A running operation stops its
    /// command and becomes canceled once the command has exited. Returns
    /// `false` when the operation had already finished.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel();
        if self
            .transition_from(Some(OperationStatus::Waiting), OperationStatus::Canceled, None)
            .is_ok()
        {
            return true;
        }
        if self.status() == OperationStatus::InProgress {
            info!(target: "devq::queue", id = %self.id, device = %self.device, "cancel requested");
            return true;
        }
        false
    }

    /// Wait until the operation reaches a terminal state.
    pub async fn wait_terminal(&self) -> OperationStatus {
        let mut rx = self.status_tx.subscribe();
        match rx.wait_for(OperationStatus::is_terminal).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    pub(crate) fn task(&self) -> &OperationTask {
        &self.task
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn attach(&self, sender: broadcast::Sender<QueueEvent>) {
        let _ = self.events.set(sender);
    }

    pub(crate) fn set_target(&self, target: impl Into<String>) {
        self.lock().target = Some(target.into());
    }

    /// Move from Waiting to InProgress. Only the queue calls this.
    pub(crate) fn start(&self) -> OpsResult<()> {
        self.transition(OperationStatus::InProgress, None)
    }

    /// Mark a running operation canceled without waiting for its command.
    pub(crate) fn force_cancel(&self) {
        self.cancel.cancel();
        let _ = self.transition(
            OperationStatus::Canceled,
            Some("Stopped before the command exited".to_string()),
        );
    }

    /// Attach an event to the progress tree and publish the new progress.
    pub(crate) fn add_event(&self, event: ProgressEvent) {
        let snapshot = {
            let mut state = self.lock();
            if !state.tree.add_event(event) {
                return;
            }
            self.build_snapshot(&state)
        };
        self.emit(QueueEvent::Progress {
            id: self.id,
            device: self.device.clone(),
            snapshot,
        });
    }

    /// Whether the tree recorded a failure anywhere.
    pub fn has_failure(&self) -> bool {
        self.lock().tree.has_failure()
    }

    /// Run a one-shot shell line and record its output in the tree.
    pub(crate) async fn shell_step(&self, ctx: &EngineContext, line: String) -> Outcome {
        self.shell_step_with(ctx, line, classify_line).await
    }

    /// Run a one-shot shell line, classifying its output with `classify`.
    pub(crate) async fn shell_step_with<F>(
        &self,
        ctx: &EngineContext,
        line: String,
        classify: F,
    ) -> Outcome
    where
        F: Fn(&str) -> Option<ProgressEvent>,
    {
        debug!(target: "devq::queue", id = %self.id, device = %self.device, line = line.as_str(), "running");
        match ctx.shell(&self.device, line, self.cancel_token()).await {
            Ok(output) => {
                for line in output.lines() {
                    if let Some(event) = classify(line) {
                        self.add_event(event);
                    }
                }
                let exit = ExitOutcome {
                    code: output.code,
                    stderr: output.stderr,
                    canceled: output.canceled,
                };
                self.record_stderr(&exit, &classify);
                Outcome::Exited(exit)
            }
            Err(e) => {
                error!(target: "devq::queue", id = %self.id, error = %e, "command failed to run");
                Outcome::Failed(e.to_string())
            }
        }
    }

    /// Run a streaming command, feeding each output line into the tree.
    pub(crate) async fn stream(&self, ctx: &EngineContext, request: CommandRequest) -> Outcome {
        self.stream_with(ctx, request, classify_line).await
    }

    /// Run a streaming command, classifying its output with `classify`.
    pub(crate) async fn stream_with<F>(
        &self,
        ctx: &EngineContext,
        request: CommandRequest,
        classify: F,
    ) -> Outcome
    where
        F: Fn(&str) -> Option<ProgressEvent>,
    {
        debug!(target: "devq::queue", id = %self.id, device = %self.device, command = %request, "streaming");
        let mut stream = ctx
            .runner()
            .spawn(&self.device, request, self.cancel_token());

        while let Some(line) = stream.next_line().await {
            if let Some(event) = classify(&line) {
                self.add_event(event);
            }
        }

        match stream.finish().await {
            Ok(exit) => {
                self.record_stderr(&exit, &classify);
                Outcome::Exited(exit)
            }
            Err(e) => {
                error!(target: "devq::queue", id = %self.id, error = %e, "command failed to run");
                Outcome::Failed(e.to_string())
            }
        }
    }

    fn record_stderr<F>(&self, exit: &ExitOutcome, classify: &F)
    where
        F: Fn(&str) -> Option<ProgressEvent>,
    {
        if exit.canceled {
            return;
        }
        for line in exit.stderr.lines() {
            match classify(line) {
                Some(ProgressEvent::Unrecognized { .. }) | None => {}
                Some(event) => self.add_event(event),
            }
        }
    }

    /// Execute the operation and move it to its terminal state.
    pub(crate) async fn run(&self, ctx: &EngineContext) {
        info!(
            target: "devq::queue",
            id = %self.id,
            device = %self.device,
            kind = %self.op_type,
            source = %self.source,
            "operation started"
        );

        let outcome = if self.cancel.is_cancelled() {
            Outcome::Canceled
        } else {
            self.execute(ctx).await
        };
        let (status, message) = self.decide(outcome);

        self.on_finished(ctx, status).await;
        if let Err(e) = self.transition(status, message) {
            debug!(target: "devq::queue", id = %self.id, error = %e, "terminal transition skipped");
            return;
        }

        if status == OperationStatus::Completed {
            for folder in self.affected_folders() {
                if ctx.is_current_view(&self.device, &folder) {
                    ctx.emit(QueueEvent::RefreshView {
                        device: self.device.clone(),
                        path: folder,
                    });
                }
            }
        }
    }

    async fn execute(&self, ctx: &EngineContext) -> Outcome {
        match &self.task {
            OperationTask::Copy { .. }
            | OperationTask::Move { .. }
            | OperationTask::Recycle
            | OperationTask::Restore { .. } => move_op::execute(self, ctx).await,
            OperationTask::Delete => delete::execute(self, ctx).await,
            OperationTask::Rename { .. } => rename::execute(self, ctx).await,
            OperationTask::InstallPackage { .. } | OperationTask::UninstallPackage => {
                package::execute(self, ctx).await
            }
            OperationTask::ChangeTimestamp { .. } => timestamp::execute(self, ctx).await,
            OperationTask::Validate { .. } => validate::execute(self, ctx).await,
            OperationTask::Push { .. } | OperationTask::Pull { .. } => {
                transfer::execute(self, ctx).await
            }
        }
    }

    async fn on_finished(&self, ctx: &EngineContext, status: OperationStatus) {
        match &self.task {
            OperationTask::Recycle | OperationTask::Restore { .. } => {
                move_op::on_finished(self, ctx, status).await
            }
            OperationTask::Delete => delete::on_finished(self, ctx, status).await,
            _ => {}
        }
    }

    /// Terminal status for an outcome, with the failure message if any.
    fn decide(&self, outcome: Outcome) -> (OperationStatus, Option<String>) {
        if self.cancel.is_cancelled() {
            return (OperationStatus::Canceled, None);
        }

        let exit = match outcome {
            Outcome::Canceled => return (OperationStatus::Canceled, None),
            Outcome::Failed(message) => return (OperationStatus::Failed, Some(message)),
            Outcome::Exited(exit) if exit.canceled => return (OperationStatus::Canceled, None),
            Outcome::Exited(exit) => exit,
        };

        let state = self.lock();
        let tree = &state.tree;

        if tree.has_own_error() {
            let message = tree.own_error_message().map(path::collapse_separators);
            return (OperationStatus::Failed, message);
        }
        if exit.code == Some(0) || tree.has_partial_progress() {
            return (OperationStatus::Completed, None);
        }

        let stderr = path::collapse_separators(exit.stderr.trim());
        let message = if !stderr.is_empty() {
            stderr
        } else {
            match exit.code {
                Some(code) => format!("Exited with code {code}"),
                None => "Terminated by signal".to_string(),
            }
        };
        (OperationStatus::Failed, Some(message))
    }

    /// Folders whose listing changes when this operation completes.
    fn affected_folders(&self) -> Vec<String> {
        let mut folders = Vec::new();
        if matches!(
            self.op_type,
            OperationType::Move
                | OperationType::Recycle
                | OperationType::Restore
                | OperationType::Delete
                | OperationType::Rename
                | OperationType::ChangeTimestamp
        ) {
            folders.push(path::parent(&self.source).to_string());
        }
        if matches!(
            self.op_type,
            OperationType::Copy
                | OperationType::Move
                | OperationType::Recycle
                | OperationType::Restore
                | OperationType::Push
        ) && let Some(target) = self.target()
        {
            let parent = path::parent(&target).to_string();
            if !folders.contains(&parent) {
                folders.push(parent);
            }
        }
        folders
    }

    fn transition(&self, to: OperationStatus, message: Option<String>) -> OpsResult<()> {
        self.transition_from(None, to, message)
    }

    /// Change status, optionally only when the current status is `expected`.
    fn transition_from(
        &self,
        expected: Option<OperationStatus>,
        to: OperationStatus,
        message: Option<String>,
    ) -> OpsResult<()> {
        let snapshot = {
            let mut state = self.lock();
            let from = state.status;
            let allowed = expected.is_none_or(|expected| expected == from)
                && matches!(
                    (from, to),
                    (OperationStatus::Waiting, OperationStatus::InProgress)
                        | (OperationStatus::Waiting, OperationStatus::Canceled)
                        | (
                            OperationStatus::InProgress,
                            OperationStatus::Completed
                                | OperationStatus::Canceled
                                | OperationStatus::Failed
                        )
                );
            if !allowed {
                return Err(OpsError::IllegalTransition { id: self.id, from, to });
            }

            state.status = to;
            if message.is_some() {
                state.message = message;
            }
            match to {
                OperationStatus::InProgress => state.started_at = Some(Local::now()),
                _ => state.finished_at = Some(Local::now()),
            }
            self.build_snapshot(&state)
        };

        info!(
            target: "devq::queue",
            id = %self.id,
            device = %self.device,
            status = %to,
            summary = snapshot.status_text.as_str(),
            "status changed"
        );
        self.emit(QueueEvent::StatusChanged {
            id: self.id,
            device: self.device.clone(),
            status: to,
            snapshot,
        });
        self.status_tx.send_replace(to);
        Ok(())
    }

    fn build_snapshot(&self, state: &OperationState) -> ProgressSnapshot {
        let (total_percent, current_path) = match state.tree.latest_transfer() {
            Some(ProgressEvent::TransferProgress {
                path,
                total_percent,
                ..
            }) => (*total_percent, Some(path.clone())),
            _ => (None, None),
        };

        let status_text = match state.status {
            OperationStatus::Waiting => "Waiting".to_string(),
            OperationStatus::InProgress => total_percent
                .map(|pct| format!("{pct}%"))
                .unwrap_or_else(|| "In progress".to_string()),
            OperationStatus::Canceled => "Canceled".to_string(),
            OperationStatus::Failed => format!(
                "Error: {}",
                state.message.as_deref().unwrap_or("Unknown error")
            ),
            OperationStatus::Completed => self.completed_text(&state.tree),
        };

        ProgressSnapshot {
            status: state.status,
            status_text,
            total_percent,
            current_path,
            counts: state.tree.counts(),
            message: state.message.clone(),
        }
    }

    fn completed_text(&self, tree: &ProgressNode) -> String {
        if self.op_type == OperationType::Validate {
            let (total, matched) = tree.hash_counts();
            if total == matched {
                return "Validated".to_string();
            }
        }
        if tree.child_count() > 0 {
            tree.status_summary()
        } else {
            "Completed".to_string()
        }
    }

    fn emit(&self, event: QueueEvent) {
        if let Some(sender) = self.events.get() {
            let _ = sender.send(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete(path: &str) -> Operation {
        Operation::new(DeviceId::new("dev"), path, None, OperationTask::Delete)
    }

    fn exited(code: i32, stderr: &str) -> Outcome {
        Outcome::Exited(ExitOutcome {
            code: Some(code),
            stderr: stderr.to_string(),
            canceled: false,
        })
    }

    #[test]
    fn test_cancel_waiting() {
        let op = delete("/sdcard/a");
        assert!(op.cancel());
        assert_eq!(op.status(), OperationStatus::Canceled);
        assert!(op.finished_at().is_some());
        assert!(op.start().is_err());
        assert!(!op.cancel());
    }

    #[test]
    fn test_illegal_transitions() {
        let op = delete("/sdcard/a");
        assert!(op.transition(OperationStatus::Completed, None).is_err());
        op.start().unwrap();
        assert!(op.start().is_err());
        op.transition(OperationStatus::Completed, None).unwrap();
        assert!(matches!(
            op.transition(OperationStatus::Failed, None),
            Err(OpsError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_decide_exit_codes() {
        let op = delete("/sdcard/a");
        assert_eq!(op.decide(exited(0, "")), (OperationStatus::Completed, None));
        assert_eq!(
            op.decide(exited(1, "rm: failed //x")),
            (OperationStatus::Failed, Some("rm: failed /x".to_string()))
        );
        assert_eq!(
            op.decide(Outcome::Failed("adb not found".into())),
            (OperationStatus::Failed, Some("adb not found".to_string()))
        );
    }

    #[test]
    fn test_decide_partial_and_root_errors() {
        let op = delete("/sdcard/a");
        op.add_event(ProgressEvent::ShellError {
            path: "/sdcard/a/b".into(),
            message: "Permission denied".into(),
        });
        assert_eq!(
            op.decide(exited(1, "rm: /sdcard/a/b: Permission denied")),
            (
                OperationStatus::Failed,
                Some("rm: /sdcard/a/b: Permission denied".to_string())
            )
        );
        assert_eq!(op.decide(exited(0, "")).0, OperationStatus::Completed);

        op.add_event(ProgressEvent::TransferProgress {
            path: "/sdcard/a/c".into(),
            total_percent: Some(50),
            current: None,
        });
        assert_eq!(op.decide(exited(1, "")).0, OperationStatus::Completed);

        op.add_event(ProgressEvent::ShellError {
            path: "/sdcard/a".into(),
            message: "Read-only file system".into(),
        });
        assert_eq!(
            op.decide(exited(0, "")),
            (OperationStatus::Failed, Some("Read-only file system".to_string()))
        );
    }

    #[test]
    fn test_decide_after_cancel() {
        let op = delete("/sdcard/a");
        op.start().unwrap();
        op.cancel();
        assert_eq!(op.decide(exited(0, "")), (OperationStatus::Canceled, None));
    }

    #[test]
    fn test_snapshot_text() {
        let op = delete("/sdcard/a");
        assert_eq!(op.snapshot().status_text, "Waiting");
        op.start().unwrap();
        assert_eq!(op.snapshot().status_text, "In progress");
        op.add_event(ProgressEvent::TransferProgress {
            path: "/sdcard/a/f".into(),
            total_percent: Some(40),
            current: None,
        });
        let snapshot = op.snapshot();
        assert_eq!(snapshot.status_text, "40%");
        assert_eq!(snapshot.current_path.as_deref(), Some("/sdcard/a/f"));
        op.transition(OperationStatus::Failed, Some("boom".into())).unwrap();
        assert_eq!(op.snapshot().status_text, "Error: boom");
    }
}
