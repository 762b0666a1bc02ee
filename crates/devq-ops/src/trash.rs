//! On-device trash index built from sidecar files.

use std::collections::HashMap;

use devq_core::{DeviceId, TrashEntry, path};
use devq_shell::{CommandOutput, escape_shell, find_tree_command, parse_tree_listing};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::EngineContext;
use crate::error::{OpsError, OpsResult};

/// An item found in the trash root, joined with its sidecar when present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrashItem {
    /// Full path of the item inside the trash root.
    pub path: String,
    pub recycle_name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Sidecar metadata; `None` when the item has no readable sidecar.
    pub entry: Option<TrashEntry>,
}

/// Sidecar store for one device.
///
/// Each recycled item `<name>` has a sidecar `<trash_root>/.<name><suffix>`
/// holding one [`TrashEntry`] line. The index does no locking of its own and
/// relies on the per-device command serialization of the queue.
#[derive(Debug, Clone, Copy)]
pub struct TrashIndex<'a> {
    ctx: &'a EngineContext,
    device: &'a DeviceId,
}

impl<'a> TrashIndex<'a> {
    pub fn new(ctx: &'a EngineContext, device: &'a DeviceId) -> Self {
        Self { ctx, device }
    }

    fn root(&self) -> &str {
        &self.ctx.config().trash_root
    }

    fn suffix(&self) -> &str {
        &self.ctx.config().index_suffix
    }

    fn sidecar(&self, recycle_name: &str) -> String {
        TrashEntry::sidecar_path_for(recycle_name, self.root(), self.suffix())
    }

    async fn run(&self, line: String) -> OpsResult<CommandOutput> {
        debug!(target: "devq::trash", device = %self.device, line = line.as_str(), "running");
        Ok(self
            .ctx
            .shell(self.device, line, CancellationToken::new())
            .await?)
    }

    /// Write the sidecar for `entry`, replacing any previous one.
    pub async fn put(&self, entry: &TrashEntry) -> OpsResult<()> {
        let sidecar = entry.sidecar_path(self.root(), self.suffix());
        let output = self
            .run(format!(
                "echo {} > {}",
                escape_shell(&entry.to_string()),
                escape_shell(&sidecar)
            ))
            .await?;

        if !output.success() {
            return Err(OpsError::trash(sidecar, failure_text(&output)));
        }
        debug!(target: "devq::trash", device = %self.device, name = entry.recycle_name.as_str(), "sidecar written");
        Ok(())
    }

    /// Read the sidecar of `recycle_name`.
    ///
    /// A missing or malformed sidecar yields `None`.
    pub async fn get(&self, recycle_name: &str) -> OpsResult<Option<TrashEntry>> {
        let sidecar = self.sidecar(recycle_name);
        let output = self.run(format!("cat {}", escape_shell(&sidecar))).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output.lines().find_map(|line| parse_entry(line, &sidecar)))
    }

    /// Every well-formed sidecar under the trash root.
    pub async fn list(&self) -> OpsResult<Vec<TrashEntry>> {
        let output = self
            .run(format!(
                "find {} -maxdepth 1 -type f -name '.*{}' -exec cat {{}} \\;",
                escape_shell(self.root()),
                self.suffix()
            ))
            .await?;
        Ok(output
            .lines()
            .filter_map(|line| parse_entry(line, self.root()))
            .collect())
    }

    /// Delete the sidecar of `recycle_name`. A missing sidecar is not an error.
    pub async fn remove(&self, recycle_name: &str) -> OpsResult<()> {
        let sidecar = self.sidecar(recycle_name);
        let output = self.run(format!("rm -f {}", escape_shell(&sidecar))).await?;
        if !output.success() {
            return Err(OpsError::trash(sidecar, failure_text(&output)));
        }
        Ok(())
    }

    /// The items in the trash root joined with their sidecars.
    ///
    /// Items without a sidecar are returned without metadata. Sidecars whose
    /// item is gone are removed on a best-effort basis.
    pub async fn list_items(&self) -> OpsResult<Vec<TrashItem>> {
        let listing = self.run(find_tree_command(self.root(), Some(1))).await?;
        let mut entries: HashMap<String, TrashEntry> = self
            .list()
            .await?
            .into_iter()
            .map(|entry| (entry.recycle_name.clone(), entry))
            .collect();

        let items: Vec<TrashItem> = parse_tree_listing(&listing.stdout)
            .into_iter()
            .filter(|item| !self.is_sidecar_name(path::file_name(&item.path)))
            .map(|item| {
                let recycle_name = path::file_name(&item.path).to_string();
                TrashItem {
                    entry: entries.remove(&recycle_name),
                    is_dir: item.is_dir(),
                    size: item.size(),
                    recycle_name,
                    path: item.path,
                }
            })
            .collect();

        if listing.success() {
            for orphan in entries.into_keys() {
                debug!(target: "devq::trash", device = %self.device, name = orphan.as_str(), "dropping orphan sidecar");
                if let Err(e) = self.remove(&orphan).await {
                    warn!(target: "devq::trash", device = %self.device, error = %e, "could not drop orphan sidecar");
                }
            }
        }
        Ok(items)
    }

    fn is_sidecar_name(&self, name: &str) -> bool {
        name.starts_with('.') && name.ends_with(self.suffix())
    }
}

fn parse_entry(line: &str, source: &str) -> Option<TrashEntry> {
    match line.trim().parse::<TrashEntry>() {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(target: "devq::trash", source, error = %e, "skipping malformed sidecar");
            None
        }
    }
}

pub(crate) fn failure_text(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return path::collapse_separators(stderr);
    }
    match output.code {
        Some(code) => format!("exited with code {code}"),
        None => "terminated by signal".to_string(),
    }
}
