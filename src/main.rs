//! devq - queued file operations against Android devices over adb.
//!
//! Usage:
//!   devq -s SERIAL copy SRC... -t DIR  Copy on the device
//!   devq -s SERIAL recycle PATH...     Move items to the device trash
//!   devq -s SERIAL pull SRC... -t DIR  Pull to the host
//!   devq -s SERIAL trash               List the device trash
//!   devq --help                        Show help

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use devq_core::{DeviceId, EngineConfig, TRASH_DATE_FORMAT};
use devq_ops::{
    ConflictResolution, EngineContext, Operation, OperationQueue, OperationStatus, QueueEvent,
    TrashIndex,
};
use devq_shell::AdbRunner;

#[derive(Parser)]
#[command(
    name = "devq",
    version,
    about = "Queued file operations against Android devices",
    long_about = "devq runs copy, move, recycle, transfer and package operations on an \
                  Android device through adb.\n\n\
                  Operations for one device run one after another in the order given."
)]
struct Cli {
    /// Serial of the target device (as listed by `adb devices`)
    #[arg(short, long, global = true)]
    serial: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy items into a device folder
    Copy {
        #[arg(required = true)]
        sources: Vec<String>,
        /// Destination folder
        #[arg(short, long)]
        to: String,
        /// What to do when the destination name exists
        #[arg(long)]
        on_conflict: Option<ConflictChoice>,
    },

    /// Move items into a device folder
    Move {
        #[arg(required = true)]
        sources: Vec<String>,
        /// Destination folder
        #[arg(short, long)]
        to: String,
        /// What to do when the destination name exists
        #[arg(long)]
        on_conflict: Option<ConflictChoice>,
    },

    /// Delete items permanently
    Delete {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Rename an item in place
    Rename {
        path: String,
        new_name: String,
        /// What to do when the new name exists
        #[arg(long)]
        on_conflict: Option<ConflictChoice>,
    },

    /// Move items to the device trash
    Recycle {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Restore recycled items by their trash name
    Restore {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List the device trash
    Trash,

    /// Pull device items to a host folder
    Pull {
        #[arg(required = true)]
        sources: Vec<String>,
        /// Host destination folder
        #[arg(short, long, default_value = ".")]
        to: PathBuf,
    },

    /// Push host items into a device folder
    Push {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Device destination folder
        #[arg(short, long)]
        to: String,
    },

    /// Install an APK
    Install {
        apk: String,
        /// The APK is on the host rather than on the device
        #[arg(long)]
        host: bool,
    },

    /// Uninstall a package
    Uninstall { package: String },

    /// Set modification times, from --date or from each file name
    Touch {
        #[arg(required = true)]
        paths: Vec<String>,
        /// Date as "YYYY-MM-DD HH:MM:SS"
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDateTime>,
    },

    /// Compare file hashes of a copy against its source
    Validate { source: String, target: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictChoice {
    Rename,
    Overwrite,
    Abort,
}

impl From<ConflictChoice> for ConflictResolution {
    fn from(choice: ConflictChoice) -> Self {
        match choice {
            ConflictChoice::Rename => Self::AutoRename,
            ConflictChoice::Overwrite => Self::Overwrite,
            ConflictChoice::Abort => Self::Abort,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(EngineConfig::default_path);
    let config = EngineConfig::load(&config_path)
        .wrap_err_with(|| format!("Failed to load config {}", config_path.display()))?;
    tracing::debug!(target: "devq::config", path = %config_path.display(), "config loaded");

    let serial = cli
        .serial
        .clone()
        .ok_or_else(|| eyre!("No device given; pass --serial <SERIAL>"))?;
    let device = DeviceId::new(serial);

    let runner = Arc::new(AdbRunner::new(&config));
    let ctx = EngineContext::new(config, runner);

    if matches!(cli.command, Command::Trash) {
        return list_trash(&ctx, &device, cli.json).await;
    }

    let operations = build_operations(&ctx, &device, cli.command).await?;
    let queue = OperationQueue::new(ctx);
    run_operations(&queue, operations, cli.json).await
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "devq=info",
        1 => "devq=debug",
        _ => "devq=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_date(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| format!("expected YYYY-MM-DD HH:MM:SS: {e}"))
}

async fn build_operations(
    ctx: &EngineContext,
    device: &DeviceId,
    command: Command,
) -> Result<Vec<Operation>> {
    let d = || device.clone();

    let operations = match command {
        Command::Copy {
            sources,
            to,
            on_conflict,
        } => sources
            .into_iter()
            .map(|s| devq_ops::copy_operation(d(), s, to.as_str(), on_conflict.map(Into::into)))
            .collect(),
        Command::Move {
            sources,
            to,
            on_conflict,
        } => sources
            .into_iter()
            .map(|s| devq_ops::move_operation(d(), s, to.as_str(), on_conflict.map(Into::into)))
            .collect(),
        Command::Delete { paths } => paths
            .into_iter()
            .map(|p| devq_ops::delete_operation(d(), p))
            .collect(),
        Command::Rename {
            path,
            new_name,
            on_conflict,
        } => {
            devq_ops::validate_name(&new_name).map_err(|e| eyre!(e))?;
            vec![devq_ops::rename_operation(
                d(),
                path,
                new_name,
                on_conflict.map(Into::into),
            )]
        }
        Command::Recycle { paths } => paths
            .into_iter()
            .map(|p| devq_ops::recycle_operation(d(), p))
            .collect(),
        Command::Restore { names } => {
            let index = TrashIndex::new(ctx, device);
            let mut operations = Vec::with_capacity(names.len());
            for name in names {
                let entry = index
                    .get(&name)
                    .await
                    .wrap_err_with(|| format!("Failed to read trash metadata for {name}"))?
                    .ok_or_else(|| eyre!("No trash metadata for {name}"))?;
                operations.push(devq_ops::restore_operation(
                    d(),
                    entry,
                    &ctx.config().trash_root,
                ));
            }
            operations
        }
        Command::Pull { sources, to } => sources
            .into_iter()
            .map(|s| devq_ops::pull_operation(d(), s, to.clone()))
            .collect(),
        Command::Push { sources, to } => sources
            .into_iter()
            .map(|s| devq_ops::push_operation(d(), s, to.as_str()))
            .collect(),
        Command::Install { apk, host } => {
            if host {
                vec![devq_ops::install_host_package_operation(d(), apk)]
            } else {
                vec![devq_ops::install_package_operation(d(), apk)]
            }
        }
        Command::Uninstall { package } => vec![devq_ops::uninstall_package_operation(d(), package)],
        Command::Touch { paths, date } => paths
            .into_iter()
            .map(|p| devq_ops::change_timestamp_operation(d(), p, date))
            .collect(),
        Command::Validate { source, target } => {
            vec![devq_ops::validate_operation(d(), source, target)]
        }
        Command::Trash => Vec::new(),
    };
    Ok(operations)
}

async fn run_operations(
    queue: &OperationQueue,
    operations: Vec<Operation>,
    json: bool,
) -> Result<()> {
    let mut events = queue.context().subscribe();
    let operations = queue.add_operations(operations);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while queue.counts().pending() > 0 {
        tokio::select! {
            event = events.recv() => match event {
                Ok(QueueEvent::StatusChanged { id, snapshot, .. }) if !json => {
                    eprintln!("{id} {}", snapshot.status_text);
                }
                Ok(QueueEvent::Progress { id, snapshot, .. }) => {
                    tracing::debug!(
                        target: "devq::queue",
                        %id,
                        status = snapshot.status_text.as_str(),
                        path = snapshot.current_path.as_deref().unwrap_or(""),
                        "progress"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(target: "devq::queue", skipped, "event receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                eprintln!("Stopping...");
                if let Err(e) = queue.stop().await {
                    tracing::warn!(target: "devq::queue", error = %e, "stop incomplete");
                }
                break;
            }
        }
    }

    if json {
        let results: Vec<_> = operations.iter().map(|op| operation_json(op)).collect();
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for op in &operations {
            print_operation(op);
        }
    }

    let failed = operations
        .iter()
        .filter(|op| op.status() == OperationStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{failed} of {} operations failed", operations.len());
    }
    Ok(())
}

fn print_operation(op: &Operation) {
    let snapshot = op.snapshot();
    let target = op.target().map(|t| format!(" -> {t}")).unwrap_or_default();
    println!(
        "{} {} {}{}: {}",
        op.id(),
        op.operation_type(),
        op.source(),
        target,
        snapshot.status_text
    );

    let tree = op.tree();
    if let Some(stats) = tree.stats() {
        let bytes = stats
            .total_bytes
            .map(|b| format!(", {}", format_size(b)))
            .unwrap_or_default();
        println!(
            "  {} files, {} skipped{bytes}",
            stats.files_transferred, stats.files_skipped
        );
    }
    for (path, message) in tree.error_messages() {
        println!("  {path}: {message}");
    }
}

fn operation_json(op: &Operation) -> serde_json::Value {
    let snapshot = op.snapshot();
    let tree = op.tree();
    let errors: Vec<_> = tree
        .error_messages()
        .into_iter()
        .map(|(path, message)| serde_json::json!({ "path": path, "message": message }))
        .collect();

    serde_json::json!({
        "id": op.id().0,
        "type": op.operation_type().to_string(),
        "source": op.source(),
        "target": op.target(),
        "status": op.status().to_string(),
        "summary": snapshot.status_text,
        "message": op.message(),
        "stats": tree.stats(),
        "errors": errors,
    })
}

async fn list_trash(ctx: &EngineContext, device: &DeviceId, json: bool) -> Result<()> {
    let items = TrashIndex::new(ctx, device)
        .list_items()
        .await
        .wrap_err("Failed to list the trash")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Trash is empty");
        return Ok(());
    }

    for item in &items {
        let (original, deleted) = match &item.entry {
            Some(entry) => (
                entry.original_path.as_str(),
                entry
                    .deleted_at
                    .map(|d| d.format(TRASH_DATE_FORMAT).to_string())
                    .unwrap_or_else(|| "?".to_string()),
            ),
            None => ("?", "?".to_string()),
        };
        let size = if item.is_dir {
            "dir".to_string()
        } else {
            format_size(item.size)
        };
        println!(
            "{:<20} {:>10}  {:<19}  {}",
            item.recycle_name, size, deleted, original
        );
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
