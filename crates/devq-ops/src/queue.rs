//! The operation queue and its per-device dispatch workers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use devq_core::{DeviceId, OperationId};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{OpsError, OpsResult};
use crate::operation::Operation;
use crate::progress::{OperationStatus, QueueCounts};
use crate::{EngineContext, QueueEvent};

struct Worker {
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

struct QueueInner {
    ctx: Arc<EngineContext>,
    operations: Mutex<Vec<Arc<Operation>>>,
    workers: Mutex<HashMap<DeviceId, Worker>>,
    halted: Mutex<HashSet<DeviceId>>,
    stop_after_failure: AtomicBool,
    shutdown: CancellationToken,
}

/// Holds every operation across all devices and dispatches them.
///
/// Operations for one device run one at a time in the order they were
/// added; operations for different devices run concurrently. A worker task
/// per device is started the first time an operation targets it, so the
/// queue must be used from within a Tokio runtime.
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("counts", &self.counts())
            .finish_non_exhaustive()
    }
}

impl OperationQueue {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                ctx,
                operations: Mutex::new(Vec::new()),
                workers: Mutex::new(HashMap::new()),
                halted: Mutex::new(HashSet::new()),
                stop_after_failure: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The context shared by all queued operations.
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.inner.ctx
    }

    /// Append an operation and wake its device's worker.
    pub fn add_operation(&self, operation: Operation) -> Arc<Operation> {
        let operation = Arc::new(operation);
        operation.attach(self.inner.ctx.sender());
        let device = operation.device().clone();

        lock(&self.inner.operations).push(operation.clone());
        debug!(target: "devq::queue", id = %operation.id(), %device, kind = %operation.operation_type(), "operation added");
        self.inner.ctx.emit(QueueEvent::Added {
            id: operation.id(),
            device: device.clone(),
        });

        self.wake(&device);
        operation
    }

    /// Append several operations, keeping their order.
    pub fn add_operations<I>(&self, operations: I) -> Vec<Arc<Operation>>
    where
        I: IntoIterator<Item = Operation>,
    {
        operations
            .into_iter()
            .map(|op| self.add_operation(op))
            .collect()
    }

    /// Remove an operation whatever its status.
    ///
    /// A running operation is canceled first and removed only once its
    /// command has exited.
    pub async fn remove(&self, id: OperationId) -> OpsResult<()> {
        let operation = self.get(id).ok_or(OpsError::UnknownOperation { id })?;

        operation.cancel();
        let acknowledged =
            tokio::time::timeout(self.inner.ctx.config().stop_timeout(), operation.wait_terminal())
                .await;
        if acknowledged.is_err() {
            warn!(target: "devq::queue", %id, "operation did not stop, keeping it queued");
            return Err(OpsError::StopTimeout { pending: 1 });
        }

        lock(&self.inner.operations).retain(|op| op.id() != id);
        self.inner.ctx.emit(QueueEvent::Removed {
            id,
            device: operation.device().clone(),
        });
        Ok(())
    }

    /// All operations in queue order.
    pub fn operations(&self) -> Vec<Arc<Operation>> {
        lock(&self.inner.operations).clone()
    }

    /// Operations addressed to `device`, in queue order.
    pub fn operations_for(&self, device: &DeviceId) -> Vec<Arc<Operation>> {
        lock(&self.inner.operations)
            .iter()
            .filter(|op| op.device() == device)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: OperationId) -> Option<Arc<Operation>> {
        lock(&self.inner.operations)
            .iter()
            .find(|op| op.id() == id)
            .cloned()
    }

    /// Operation counts by status, computed from current state.
    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for op in lock(&self.inner.operations).iter() {
            counts.add(op.status());
        }
        counts
    }

    /// Overall completion between 0.0 and 1.0. An empty queue is complete.
    pub fn progress(&self) -> f64 {
        let operations = lock(&self.inner.operations);
        if operations.is_empty() {
            return 1.0;
        }
        let sum: f64 = operations.iter().map(|op| op.snapshot().fraction()).sum();
        sum / operations.len() as f64
    }

    /// Remove every operation that reached a terminal state.
    pub fn clear_completed(&self) -> usize {
        let removed: Vec<Arc<Operation>> = {
            let mut operations = lock(&self.inner.operations);
            let (done, keep): (Vec<_>, Vec<_>) = operations
                .drain(..)
                .partition(|op| op.status().is_terminal());
            *operations = keep;
            done
        };
        for op in &removed {
            self.inner.ctx.emit(QueueEvent::Removed {
                id: op.id(),
                device: op.device().clone(),
            });
        }
        removed.len()
    }

    /// Cancel and remove every operation that has not started.
    pub fn clear_pending(&self) -> usize {
        let removed: Vec<Arc<Operation>> = {
            let mut operations = lock(&self.inner.operations);
            let mut removed = Vec::new();
            operations.retain(|op| {
                if op.status() == OperationStatus::Waiting && op.cancel() {
                    removed.push(op.clone());
                    false
                } else {
                    true
                }
            });
            removed
        };
        for op in &removed {
            self.inner.ctx.emit(QueueEvent::Removed {
                id: op.id(),
                device: op.device().clone(),
            });
        }
        removed.len()
    }

    /// Halt dispatch for a device after one of its operations fails.
    pub fn set_stop_after_failure(&self, enabled: bool) {
        self.inner.stop_after_failure.store(enabled, Ordering::Relaxed);
    }

    /// Whether dispatch for `device` is halted after a failure.
    pub fn is_halted(&self, device: &DeviceId) -> bool {
        lock(&self.inner.halted).contains(device)
    }

    /// Resume dispatch for a device halted after a failure.
    pub fn resume(&self, device: &DeviceId) {
        if lock(&self.inner.halted).remove(device) {
            info!(target: "devq::queue", %device, "dispatch resumed");
            self.wake(device);
        }
    }

    /// Cancel running operations and halt dispatch.
    ///
    /// Waits up to the configured stop timeout for running operations to
    /// acknowledge. Operations still running after that are marked canceled
    /// and their workers are aborted.
    pub async fn stop(&self) -> OpsResult<()> {
        let running: Vec<Arc<Operation>> = {
            let operations = lock(&self.inner.operations);
            self.inner.shutdown.cancel();
            operations
                .iter()
                .filter(|op| op.status() == OperationStatus::InProgress)
                .cloned()
                .collect()
        };
        info!(target: "devq::queue", running = running.len(), "stopping queue");

        for op in &running {
            op.cancel();
        }
        let all_stopped = async {
            for op in &running {
                op.wait_terminal().await;
            }
        };
        let timed_out = tokio::time::timeout(self.inner.ctx.config().stop_timeout(), all_stopped)
            .await
            .is_err();

        let workers: Vec<Worker> = lock(&self.inner.workers)
            .drain()
            .map(|(_, worker)| worker)
            .collect();

        if timed_out {
            for worker in &workers {
                worker.handle.abort();
            }
            let stuck: Vec<_> = running
                .iter()
                .filter(|op| !op.status().is_terminal())
                .collect();
            for op in &stuck {
                op.force_cancel();
            }
            warn!(target: "devq::queue", pending = stuck.len(), "operations did not stop in time");
            return Err(OpsError::StopTimeout {
                pending: stuck.len(),
            });
        }

        for worker in workers {
            let _ = worker.handle.await;
        }
        Ok(())
    }

    fn wake(&self, device: &DeviceId) {
        if self.inner.shutdown.is_cancelled() {
            warn!(target: "devq::queue", %device, "queue is stopped, not dispatching");
            return;
        }

        let mut workers = lock(&self.inner.workers);
        let alive = workers
            .get(device)
            .is_some_and(|worker| !worker.handle.is_finished());
        if !alive {
            let wake = Arc::new(Notify::new());
            let handle = tokio::spawn(worker_loop(
                self.inner.clone(),
                device.clone(),
                wake.clone(),
            ));
            debug!(target: "devq::queue", %device, "worker started");
            workers.insert(device.clone(), Worker { wake, handle });
        }
        if let Some(worker) = workers.get(device) {
            worker.wake.notify_one();
        }
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl QueueInner {
    /// Start the first waiting operation for `device`.
    ///
    /// Selection and the Waiting to InProgress step happen under the queue
    /// lock, so an operation is never dispatched twice.
    fn take_next(&self, device: &DeviceId) -> Option<Arc<Operation>> {
        let operations = lock(&self.operations);
        if self.shutdown.is_cancelled() || lock(&self.halted).contains(device) {
            return None;
        }
        operations
            .iter()
            .filter(|op| op.device() == device && op.status() == OperationStatus::Waiting)
            .find(|op| op.start().is_ok())
            .cloned()
    }
}

async fn worker_loop(inner: Arc<QueueInner>, device: DeviceId, wake: Arc<Notify>) {
    loop {
        let operation = match inner.take_next(&device) {
            Some(operation) => operation,
            None => {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = inner.shutdown.cancelled() => break,
                }
                continue;
            }
        };

        operation.run(&inner.ctx).await;

        if operation.status() == OperationStatus::Failed
            && inner.stop_after_failure.load(Ordering::Relaxed)
        {
            info!(target: "devq::queue", %device, id = %operation.id(), "dispatch halted after failure");
            lock(&inner.halted).insert(device.clone());
        }
    }
    debug!(target: "devq::queue", %device, "worker stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
