//! Shared engine state handed to the queue and its operations.

use std::sync::{Arc, Mutex, PoisonError};

use devq_core::{DeviceId, EngineConfig, OperationId};
use devq_shell::{CommandOutput, CommandRequest, CommandRunner, ShellError, run_shell};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{OperationStatus, ProgressSnapshot};

/// The device folder a collaborator is currently showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewLocation {
    pub device: DeviceId,
    pub path: String,
}

/// Notifications published by the queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// An operation was appended to the queue.
    Added { id: OperationId, device: DeviceId },
    /// An operation changed status.
    StatusChanged {
        id: OperationId,
        device: DeviceId,
        status: OperationStatus,
        snapshot: ProgressSnapshot,
    },
    /// An operation's progress tree changed.
    Progress {
        id: OperationId,
        device: DeviceId,
        snapshot: ProgressSnapshot,
    },
    /// An operation was removed from the queue.
    Removed { id: OperationId, device: DeviceId },
    /// The displayed folder was changed by a completed operation.
    RefreshView { device: DeviceId, path: String },
}

/// Engine-wide state: configuration, the command runner, the displayed
/// location and the event channel.
pub struct EngineContext {
    config: EngineConfig,
    runner: Arc<dyn CommandRunner>,
    view: Mutex<Option<ViewLocation>>,
    events: broadcast::Sender<QueueEvent>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .field("view", &self.view())
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Create a context around `runner`.
    pub fn new(config: EngineConfig, runner: Arc<dyn CommandRunner>) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new(Self {
            config,
            runner,
            view: Mutex::new(None),
            events,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Subscribe to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<QueueEvent> {
        self.events.clone()
    }

    /// Set the folder a collaborator is showing.
    pub fn set_view(&self, location: Option<ViewLocation>) {
        *self.view.lock().unwrap_or_else(PoisonError::into_inner) = location;
    }

    /// The folder a collaborator is showing.
    pub fn view(&self) -> Option<ViewLocation> {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether `path` on `device` is the folder being shown.
    pub fn is_current_view(&self, device: &DeviceId, path: &str) -> bool {
        self.view().is_some_and(|view| {
            &view.device == device
                && devq_core::path::trim_trailing(&view.path) == devq_core::path::trim_trailing(path)
        })
    }

    /// Publish an event. Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    /// Run a one-shot device shell line with the configured busybox fallback.
    pub async fn shell(
        &self,
        device: &DeviceId,
        line: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<CommandOutput, ShellError> {
        run_shell(
            self.runner(),
            device,
            CommandRequest::shell(line),
            cancel,
            self.config.busybox_fallback,
        )
        .await
    }
}
