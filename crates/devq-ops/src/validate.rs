//! Hash comparison of a copied tree against its source.

use std::collections::BTreeMap;

use devq_core::{DeviceId, HashOutcome, ProgressEvent, path};
use devq_shell::{classify_line, escape_shell, parse_hash_line};

use crate::EngineContext;
use crate::operation::{Operation, OperationTask, Outcome};

/// Compare every file below `source` with its counterpart below `target`.
pub fn validate_operation(
    device: DeviceId,
    source: impl Into<String>,
    target: impl Into<String>,
) -> Operation {
    let target = target.into();
    Operation::new(
        device,
        source,
        Some(target.clone()),
        OperationTask::Validate { target },
    )
}

/// Hashes keyed by path relative to the hashed root.
type Hashes = BTreeMap<String, String>;

async fn hash_tree(op: &Operation, ctx: &EngineContext, root: &str) -> Result<Hashes, Outcome> {
    let line = format!("find {} -type f -exec md5sum {{}} \\;", escape_shell(root));
    let output = match ctx.shell(op.device(), line, op.cancel_token()).await {
        Ok(output) if output.canceled => return Err(Outcome::Canceled),
        Ok(output) => output,
        Err(e) => return Err(Outcome::Failed(e.to_string())),
    };

    let mut hashes = BTreeMap::new();
    for line in output.lines() {
        match parse_hash_line(line) {
            Some((hash, file)) => {
                if let Some(relative) = path::relative(&file, root) {
                    hashes.insert(relative.to_string(), hash);
                }
            }
            None => {
                if let Some(event) = classify_line(line) {
                    op.add_event(event);
                }
            }
        }
    }

    if hashes.is_empty() && !output.success() {
        let stderr = path::collapse_separators(output.stderr.trim());
        return Err(Outcome::Failed(if stderr.is_empty() {
            format!("Could not hash {root}")
        } else {
            stderr
        }));
    }
    Ok(hashes)
}

/// Compare two hash listings, returning one event per source file.
pub(crate) fn compare(source_root: &str, source: &Hashes, target: &Hashes) -> Vec<ProgressEvent> {
    source
        .iter()
        .map(|(relative, hash)| {
            let outcome = match target.get(relative) {
                Some(other) if other == hash => HashOutcome::Match,
                Some(_) => HashOutcome::Mismatch,
                None => HashOutcome::Missing,
            };
            let file = if relative.is_empty() {
                source_root.to_string()
            } else {
                path::concat(source_root, relative)
            };
            ProgressEvent::HashResult {
                path: file,
                outcome,
                hash: Some(hash.clone()),
            }
        })
        .collect()
}

pub(crate) async fn execute(op: &Operation, ctx: &EngineContext) -> Outcome {
    let OperationTask::Validate { target } = op.task() else {
        return Outcome::Failed(format!("{} is not a validation", op.operation_type()));
    };

    let source_hashes = match hash_tree(op, ctx, op.source()).await {
        Ok(hashes) => hashes,
        Err(outcome) => return outcome,
    };
    let target_hashes = match hash_tree(op, ctx, target).await {
        Ok(hashes) => hashes,
        Err(outcome) => return outcome,
    };

    let events = compare(op.source(), &source_hashes, &target_hashes);
    let total = events.len();
    let mut failed = 0;
    for event in events {
        if event.is_error() {
            failed += 1;
        }
        op.add_event(event);
    }

    if failed > 0 {
        Outcome::Failed(format!("{failed} of {total} files did not match"))
    } else {
        Outcome::success()
    }
}
