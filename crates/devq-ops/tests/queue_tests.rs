use devq_core::{DeviceId, EngineConfig, TrashEntry};
use devq_ops::{
    ConflictResolution, EngineContext, Operation, OperationQueue, OperationStatus, QueueEvent,
    TrashIndex, ViewLocation, change_timestamp_operation, copy_operation, delete_operation,
    recycle_operation, rename_operation, restore_operation, uninstall_package_operation,
    validate_operation,
};
use devq_shell::{CommandRequest, CommandRunner, CommandStream, ExitOutcome, LINE_CHANNEL_SIZE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const TRASH: &str = "/sdcard/.Trash";

#[derive(Clone)]
enum Reply {
    Exit {
        stdout: Vec<String>,
        stderr: String,
        code: i32,
    },
    /// Runs until the gate is released or the command is canceled.
    Gate(Arc<Notify>),
}

fn exit(stdout: &[&str], stderr: &str, code: i32) -> Reply {
    Reply::Exit {
        stdout: stdout.iter().map(|s| s.to_string()).collect(),
        stderr: stderr.to_string(),
        code,
    }
}

/// Command runner answering from a script of `(substring, reply)` rules.
#[derive(Default)]
struct ScriptedRunner {
    rules: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<String>>,
    running: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    fn on(&self, pattern: &str, reply: Reply) {
        self.rules.lock().unwrap().push((pattern.to_string(), reply));
    }

    fn gate(&self, pattern: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.on(pattern, Reply::Gate(gate.clone()));
        gate
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn called(&self, needle: &str) -> bool {
        self.calls().iter().any(|call| call.contains(needle))
    }

    fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

impl CommandRunner for ScriptedRunner {
    fn spawn(
        &self,
        device: &DeviceId,
        request: CommandRequest,
        cancel: CancellationToken,
    ) -> CommandStream {
        let text = request.to_string();
        self.calls.lock().unwrap().push(format!("{device} {text}"));
        let reply = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| text.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| exit(&[], "", 0));

        let (line_tx, lines) = mpsc::channel(LINE_CHANNEL_SIZE);
        let (exit_tx, exit_rx) = oneshot::channel();
        let running = self.running.clone();
        running.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let outcome = match reply {
                Reply::Exit {
                    stdout,
                    stderr,
                    code,
                } => {
                    for line in stdout {
                        let _ = line_tx.send(line).await;
                    }
                    ExitOutcome {
                        code: Some(code),
                        stderr,
                        canceled: false,
                    }
                }
                Reply::Gate(gate) => tokio::select! {
                    _ = gate.notified() => ExitOutcome { code: Some(0), ..Default::default() },
                    _ = cancel.cancelled() => ExitOutcome { code: None, stderr: String::new(), canceled: true },
                },
            };
            drop(line_tx);
            running.fetch_sub(1, Ordering::SeqCst);
            let _ = exit_tx.send(Ok(outcome));
        });

        CommandStream::new(lines, exit_rx)
    }
}

fn setup() -> (Arc<ScriptedRunner>, OperationQueue) {
    let config = EngineConfig::builder()
        .trash_root(TRASH)
        .cancel_grace_ms(500u64)
        .stop_timeout_ms(2000u64)
        .build()
        .unwrap();
    let runner = Arc::new(ScriptedRunner::default());
    let ctx = EngineContext::new(config, runner.clone());
    (runner, OperationQueue::new(ctx))
}

fn device() -> DeviceId {
    DeviceId::new("emulator-5554")
}

async fn finished(op: &Operation) -> OperationStatus {
    tokio::time::timeout(Duration::from_secs(5), op.wait_terminal())
        .await
        .expect("operation did not finish")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_same_device_runs_in_order() {
    let (runner, queue) = setup();
    let gate = runner.gate("rm -rf /sdcard/first");

    let first = queue.add_operation(delete_operation(device(), "/sdcard/first"));
    let second = queue.add_operation(delete_operation(device(), "/sdcard/second"));

    wait_until(|| first.status() == OperationStatus::InProgress).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second.status(), OperationStatus::Waiting);
    assert!(!runner.called("/sdcard/second"));

    gate.notify_one();
    assert_eq!(finished(&first).await, OperationStatus::Completed);
    assert_eq!(finished(&second).await, OperationStatus::Completed);
    assert!(second.started_at().unwrap() >= first.finished_at().unwrap());
}

#[tokio::test]
async fn test_devices_run_concurrently() {
    let (runner, queue) = setup();
    let gate_a = runner.gate("/sdcard/a");
    let gate_b = runner.gate("/sdcard/b");

    let a = queue.add_operation(delete_operation(DeviceId::new("one"), "/sdcard/a"));
    let b = queue.add_operation(delete_operation(DeviceId::new("two"), "/sdcard/b"));

    wait_until(|| {
        a.status() == OperationStatus::InProgress && b.status() == OperationStatus::InProgress
    })
    .await;
    assert_eq!(queue.counts().in_progress, 2);

    gate_a.notify_one();
    gate_b.notify_one();
    assert_eq!(finished(&a).await, OperationStatus::Completed);
    assert_eq!(finished(&b).await, OperationStatus::Completed);
}

#[tokio::test]
async fn test_cancel_running_operation() {
    let (runner, queue) = setup();
    let _gate = runner.gate("rm -rf");

    let op = queue.add_operation(delete_operation(device(), "/sdcard/big"));
    wait_until(|| op.status() == OperationStatus::InProgress).await;

    assert!(op.cancel());
    assert_eq!(finished(&op).await, OperationStatus::Canceled);
    assert_eq!(runner.running(), 0);
    assert_eq!(op.snapshot().status_text, "Canceled");
}

#[tokio::test]
async fn test_cancel_waiting_operation_never_runs() {
    let (runner, queue) = setup();
    let gate = runner.gate("/sdcard/first");

    let first = queue.add_operation(delete_operation(device(), "/sdcard/first"));
    let second = queue.add_operation(delete_operation(device(), "/sdcard/second"));
    wait_until(|| first.status() == OperationStatus::InProgress).await;

    assert!(second.cancel());
    assert_eq!(second.status(), OperationStatus::Canceled);

    gate.notify_one();
    finished(&first).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!runner.called("/sdcard/second"));
    assert!(!second.cancel());
}

#[tokio::test]
async fn test_status_events_in_order() {
    let (_runner, queue) = setup();
    let mut events = queue.context().subscribe();

    let op = queue.add_operation(delete_operation(device(), "/sdcard/x"));
    finished(&op).await;

    let mut statuses = Vec::new();
    let mut added = false;
    while let Ok(event) = events.try_recv() {
        match event {
            QueueEvent::Added { id, .. } if id == op.id() => added = true,
            QueueEvent::StatusChanged { id, status, snapshot, .. } if id == op.id() => {
                assert_eq!(snapshot.status, status);
                statuses.push(status);
            }
            _ => {}
        }
    }
    assert!(added);
    assert_eq!(
        statuses,
        vec![OperationStatus::InProgress, OperationStatus::Completed]
    );
}

#[tokio::test]
async fn test_partial_failure_completes() {
    let (runner, queue) = setup();
    runner.on(
        "cp -r",
        exit(&[], "cp: /sdcard/A/sub/x: Permission denied", 0),
    );

    let op = queue.add_operation(copy_operation(device(), "/sdcard/A", "/sdcard/B", None));
    assert_eq!(finished(&op).await, OperationStatus::Completed);
    assert!(op.has_failure());
    assert_eq!(op.snapshot().status_text, "1 Failed, 0 Completed");
    assert_eq!(op.target().as_deref(), Some("/sdcard/B/A"));
}

#[tokio::test]
async fn test_sub_item_errors_with_nonzero_exit_fail() {
    let (runner, queue) = setup();
    runner.on(
        "rm -rf",
        exit(
            &[],
            "rm: /sdcard/X/a: Permission denied\nrm: /sdcard/X/b: Permission denied",
            1,
        ),
    );

    let op = queue.add_operation(delete_operation(device(), "/sdcard/X"));
    assert_eq!(finished(&op).await, OperationStatus::Failed);
    assert_eq!(op.snapshot().counts.failed, 2);
    assert!(
        op.message()
            .is_some_and(|m| m.starts_with("rm: /sdcard/X/a: Permission denied"))
    );
}

#[tokio::test]
async fn test_root_error_fails() {
    let (runner, queue) = setup();
    runner.on(
        "rm -rf",
        exit(&[], "rm: /sdcard/locked: Permission denied", 1),
    );

    let op = queue.add_operation(delete_operation(device(), "/sdcard/locked"));
    assert_eq!(finished(&op).await, OperationStatus::Failed);
    assert_eq!(op.message().as_deref(), Some("Permission denied"));
    assert_eq!(op.snapshot().status_text, "Error: Permission denied");
}

#[tokio::test]
async fn test_silent_failure_reports_exit_code() {
    let (runner, queue) = setup();
    runner.on("rm -rf", exit(&[], "", 2));

    let op = queue.add_operation(delete_operation(device(), "/sdcard/x"));
    assert_eq!(finished(&op).await, OperationStatus::Failed);
    assert_eq!(op.message().as_deref(), Some("Exited with code 2"));
}

#[tokio::test]
async fn test_copy_conflict_resolution() {
    let (runner, queue) = setup();
    runner.on(
        "-maxdepth 1",
        exit(&["/// /sdcard/B/a.txt /// 10 /// 1700000000.0000000000 ///"], "", 0),
    );

    let renamed = queue.add_operation(copy_operation(device(), "/sdcard/A/a.txt", "/sdcard/B", None));
    assert_eq!(finished(&renamed).await, OperationStatus::Completed);
    assert_eq!(renamed.target().as_deref(), Some("/sdcard/B/a - Copy 1.txt"));
    assert!(runner.called("cp -r /sdcard/A/a.txt /sdcard/B/a\\ -\\ Copy\\ 1.txt"));

    let aborted = queue.add_operation(copy_operation(
        device(),
        "/sdcard/A/a.txt",
        "/sdcard/B",
        Some(ConflictResolution::Abort),
    ));
    assert_eq!(finished(&aborted).await, OperationStatus::Failed);
    assert_eq!(
        aborted.message().as_deref(),
        Some("Target already exists: /sdcard/B/a.txt")
    );
}

#[tokio::test]
async fn test_overwrite_stops_when_existing_target_survives() {
    let (runner, queue) = setup();
    runner.on(
        "-maxdepth 1",
        exit(&["/// /sdcard/B/dir /// d /// d ///"], "", 0),
    );
    runner.on(
        "rm -rf /sdcard/B/dir",
        exit(&[], "rm: /sdcard/B/dir/locked: Read-only file system", 1),
    );

    let op = queue.add_operation(devq_ops::move_operation(
        device(),
        "/sdcard/A/dir",
        "/sdcard/B",
        Some(ConflictResolution::Overwrite),
    ));
    assert_eq!(finished(&op).await, OperationStatus::Failed);
    assert!(!runner.called("mv /sdcard/A/dir"));
    assert_eq!(
        op.message().as_deref(),
        Some(
            "Could not replace existing target: /sdcard/B/dir \
             (rm: /sdcard/B/dir/locked: Read-only file system)"
        )
    );
}

#[tokio::test]
async fn test_unlistable_target_fails_before_copy() {
    let (runner, queue) = setup();
    runner.on(
        "-maxdepth 1",
        exit(&["find: unknown predicate '-printf'"], "", 1),
    );

    let op = queue.add_operation(copy_operation(
        device(),
        "/sdcard/A/a.txt",
        "/sdcard/B",
        Some(ConflictResolution::Abort),
    ));
    assert_eq!(finished(&op).await, OperationStatus::Failed);
    assert!(!runner.called("cp -r"));
    assert_eq!(
        op.message().as_deref(),
        Some("Could not list target folder: /sdcard/B (find: unknown predicate '-printf')")
    );
}

#[tokio::test]
async fn test_move_into_itself_fails() {
    let (runner, queue) = setup();

    let op = queue.add_operation(devq_ops::move_operation(
        device(),
        "/sdcard/A",
        "/sdcard/A/inner",
        None,
    ));
    assert_eq!(finished(&op).await, OperationStatus::Failed);
    assert!(!runner.called("mv "));
}

#[tokio::test]
async fn test_refresh_view_for_displayed_folder() {
    let (_runner, queue) = setup();
    queue.context().set_view(Some(ViewLocation {
        device: device(),
        path: "/sdcard/B".to_string(),
    }));
    let mut events = queue.context().subscribe();

    let op = queue.add_operation(copy_operation(device(), "/sdcard/A", "/sdcard/B", None));
    finished(&op).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut refreshed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::RefreshView { path, .. } = event {
            refreshed.push(path);
        }
    }
    assert_eq!(refreshed, vec!["/sdcard/B".to_string()]);
}

#[tokio::test]
async fn test_recycle_writes_sidecar() {
    let (runner, queue) = setup();

    let op = queue.add_operation(recycle_operation(device(), "/sdcard/DCIM/a.jpg"));
    assert_eq!(finished(&op).await, OperationStatus::Completed);

    let target = op.target().unwrap();
    assert!(target.starts_with("/sdcard/.Trash/{"));
    assert!(runner.called("mkdir -p /sdcard/.Trash"));
    assert!(runner.called(&format!("mv /sdcard/DCIM/a.jpg {target}")));

    let name = target.trim_start_matches("/sdcard/.Trash/");
    let sidecar_write = runner
        .calls()
        .into_iter()
        .find(|call| call.contains("echo "))
        .unwrap();
    assert!(sidecar_write.contains(&format!("{name}\\|/sdcard/DCIM/a.jpg\\|")));
    assert!(sidecar_write.ends_with(&format!("> /sdcard/.Trash/.{name}.index")));
}

#[tokio::test]
async fn test_failed_recycle_is_cleaned_up() {
    let (runner, queue) = setup();
    runner.on(
        "mv ",
        exit(&[], "mv: /sdcard/DCIM/a.jpg: Permission denied", 1),
    );

    let op = queue.add_operation(recycle_operation(device(), "/sdcard/DCIM/a.jpg"));
    assert_eq!(finished(&op).await, OperationStatus::Failed);
    assert!(runner.called("rm -rf /sdcard/.Trash/{"));
    assert!(runner.called("rm -f /sdcard/.Trash/.{"));
    assert!(!runner.called("echo "));
}

#[tokio::test]
async fn test_restore_removes_sidecar() {
    let (runner, queue) = setup();
    let entry = TrashEntry::new("{1}", "/sdcard/DCIM/a.jpg", None);

    let op = queue.add_operation(restore_operation(device(), entry, TRASH));
    assert_eq!(finished(&op).await, OperationStatus::Completed);
    assert!(runner.called("mkdir -p /sdcard/DCIM"));
    assert!(runner.called("mv /sdcard/.Trash/{1} /sdcard/DCIM/a.jpg"));
    assert!(runner.called("rm -f /sdcard/.Trash/.{1}.index"));
}

#[tokio::test]
async fn test_delete_from_trash_removes_sidecar() {
    let (runner, queue) = setup();

    let op = queue.add_operation(delete_operation(device(), "/sdcard/.Trash/{7}"));
    assert_eq!(finished(&op).await, OperationStatus::Completed);
    assert!(runner.called("rm -f /sdcard/.Trash/.{7}.index"));

    let plain = queue.add_operation(delete_operation(device(), "/sdcard/other"));
    finished(&plain).await;
    assert!(!runner.called("rm -f /sdcard/.other.index"));
}

#[tokio::test]
async fn test_trash_listing_reconciles_sidecars() {
    let (runner, queue) = setup();
    runner.on(
        "-printf",
        exit(
            &[
                "/// /sdcard/.Trash/{1} /// 10 /// 1700000000.0000000000 ///",
                "/// /sdcard/.Trash/.{1}.index /// 40 /// 1700000000.0000000000 ///",
                "/// /sdcard/.Trash/{2} /// d /// d ///",
            ],
            "",
            0,
        ),
    );
    runner.on(
        "-exec cat",
        exit(
            &[
                "{1}|/sdcard/DCIM/a.jpg|2026.10.17-10:00:00",
                "{3}|/sdcard/gone|2026.10.17-10:00:00",
                "garbage",
            ],
            "",
            0,
        ),
    );

    let id = device();
    let index = TrashIndex::new(queue.context(), &id);
    let items = index.list_items().await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].recycle_name, "{1}");
    assert_eq!(
        items[0].entry.as_ref().map(|e| e.original_path.as_str()),
        Some("/sdcard/DCIM/a.jpg")
    );
    assert_eq!(items[1].recycle_name, "{2}");
    assert!(items[1].is_dir);
    assert!(items[1].entry.is_none());
    assert!(runner.called("rm -f /sdcard/.Trash/.{3}.index"));
}

#[tokio::test]
async fn test_trash_get_missing_sidecar() {
    let (runner, queue) = setup();
    runner.on("cat ", exit(&[], "cat: /sdcard/.Trash/.{9}.index: No such file or directory", 1));

    let id = device();
    let index = TrashIndex::new(queue.context(), &id);
    assert_eq!(index.get("{9}").await.unwrap(), None);
}

#[tokio::test]
async fn test_validate_matching_copy() {
    let (runner, queue) = setup();
    runner.on(
        "find /sdcard/src -type f",
        exit(&["d41d8cd98f00b204e9800998ecf8427e  /sdcard/src/a"], "", 0),
    );
    runner.on(
        "find /sdcard/dst -type f",
        exit(&["d41d8cd98f00b204e9800998ecf8427e  /sdcard/dst/a"], "", 0),
    );

    let op = queue.add_operation(validate_operation(device(), "/sdcard/src", "/sdcard/dst"));
    assert_eq!(finished(&op).await, OperationStatus::Completed);
    assert_eq!(op.snapshot().status_text, "Validated");
}

#[tokio::test]
async fn test_validate_mismatch_fails() {
    let (runner, queue) = setup();
    runner.on(
        "find /sdcard/src -type f",
        exit(&["d41d8cd98f00b204e9800998ecf8427e  /sdcard/src/a"], "", 0),
    );
    runner.on(
        "find /sdcard/dst -type f",
        exit(&["00000000000000000000000000000000  /sdcard/dst/a"], "", 0),
    );

    let op = queue.add_operation(validate_operation(device(), "/sdcard/src", "/sdcard/dst"));
    assert_eq!(finished(&op).await, OperationStatus::Failed);
    assert_eq!(op.message().as_deref(), Some("1 of 1 files did not match"));
}

#[tokio::test]
async fn test_rename_and_timestamp_commands() {
    let (runner, queue) = setup();

    let rename = queue.add_operation(rename_operation(device(), "/sdcard/old name.txt", "new.txt", None));
    let touch = queue.add_operation(change_timestamp_operation(
        device(),
        "/sdcard/IMG_20230714_183012.jpg",
        None,
    ));
    let undated = queue.add_operation(change_timestamp_operation(device(), "/sdcard/notes.txt", None));

    assert_eq!(finished(&rename).await, OperationStatus::Completed);
    assert!(runner.called("mv /sdcard/old\\ name.txt /sdcard/new.txt"));

    assert_eq!(finished(&touch).await, OperationStatus::Completed);
    assert!(runner.called("touch -m -t 202307141830.12 /sdcard/IMG_20230714_183012.jpg"));

    assert_eq!(finished(&undated).await, OperationStatus::Failed);
}

#[tokio::test]
async fn test_uninstall_failure_line_fails() {
    let (runner, queue) = setup();
    runner.on(
        "pm uninstall",
        exit(&["Failure [DELETE_FAILED_INTERNAL_ERROR]"], "", 0),
    );

    let op = queue.add_operation(uninstall_package_operation(device(), "com.example.app"));
    assert_eq!(finished(&op).await, OperationStatus::Failed);
    assert_eq!(
        op.message().as_deref(),
        Some("Failure [DELETE_FAILED_INTERNAL_ERROR]")
    );
}

#[tokio::test]
async fn test_remove_running_operation() {
    let (runner, queue) = setup();
    let _gate = runner.gate("rm -rf");

    let op = queue.add_operation(delete_operation(device(), "/sdcard/x"));
    wait_until(|| op.status() == OperationStatus::InProgress).await;

    queue.remove(op.id()).await.unwrap();
    assert_eq!(op.status(), OperationStatus::Canceled);
    assert!(queue.get(op.id()).is_none());
    assert_eq!(runner.running(), 0);
    assert!(queue.remove(op.id()).await.is_err());
}

#[tokio::test]
async fn test_stop_cancels_running_and_halts_dispatch() {
    let (runner, queue) = setup();
    let _gate = runner.gate("/sdcard/first");

    let first = queue.add_operation(delete_operation(device(), "/sdcard/first"));
    let second = queue.add_operation(delete_operation(device(), "/sdcard/second"));
    wait_until(|| first.status() == OperationStatus::InProgress).await;

    queue.stop().await.unwrap();
    assert_eq!(first.status(), OperationStatus::Canceled);
    assert_eq!(second.status(), OperationStatus::Waiting);
    assert_eq!(runner.running(), 0);

    let late = queue.add_operation(delete_operation(device(), "/sdcard/late"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(late.status(), OperationStatus::Waiting);
}

#[tokio::test]
async fn test_stop_after_failure_halts_device() {
    let (runner, queue) = setup();
    queue.set_stop_after_failure(true);
    runner.on("/sdcard/bad", exit(&[], "", 1));

    let bad = queue.add_operation(delete_operation(device(), "/sdcard/bad"));
    let next = queue.add_operation(delete_operation(device(), "/sdcard/next"));

    assert_eq!(finished(&bad).await, OperationStatus::Failed);
    wait_until(|| queue.is_halted(&device())).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(next.status(), OperationStatus::Waiting);

    queue.resume(&device());
    assert_eq!(finished(&next).await, OperationStatus::Completed);
}

#[tokio::test]
async fn test_counts_and_clearing() {
    let (runner, queue) = setup();
    let gate = runner.gate("/sdcard/slow");

    let done = queue.add_operation(delete_operation(device(), "/sdcard/done"));
    finished(&done).await;
    let slow = queue.add_operation(delete_operation(device(), "/sdcard/slow"));
    queue.add_operation(delete_operation(device(), "/sdcard/pending"));
    wait_until(|| slow.status() == OperationStatus::InProgress).await;

    let counts = queue.counts();
    assert_eq!(counts.completed, 1);
    assert_eq!(counts.in_progress, 1);
    assert_eq!(counts.waiting, 1);
    assert!(queue.progress() > 0.3 && queue.progress() < 0.4);

    assert_eq!(queue.clear_pending(), 1);
    assert_eq!(queue.clear_completed(), 1);
    assert_eq!(queue.operations().len(), 1);

    gate.notify_one();
    finished(&slow).await;
    assert_eq!(queue.clear_completed(), 1);
    assert_eq!(queue.counts().total(), 0);
    assert_eq!(queue.progress(), 1.0);
}
