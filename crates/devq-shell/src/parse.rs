//! Classification of control binary and device shell output lines.

use std::sync::LazyLock;

use devq_core::path::collapse_separators;
use devq_core::{HashOutcome, ProgressEvent, StatsSummary, TransferAmount};
use regex::{Captures, Regex};

static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[ *(?:(?<total>\d+)%|\?)\] (?<file>.+?)(?:: (?:(?<current>\d+)%|(?<bytes>\d+)/\?))? *$",
    )
    .expect("valid progress regex")
});

static STATS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?<path>.+?): (?<files>\d+) files? (?:pulled|pushed), (?<skipped>\d+) skipped\.(?: (?<rate>\d+(?:\.\d+)?) MB/s \((?<bytes>\d+) bytes in (?<time>\d+(?:\.\d+)?)s\))? *$",
    )
    .expect("valid stats regex")
});

static HASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<hash>[0-9a-fA-F]{32,})[ \-*]+(?<path>/.*?) *$").expect("valid hash regex")
});

static TRANSFER_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:adb: )?error: (?<message>.+)$").expect("valid transfer error regex")
});

static SHELL_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.\-\[\]/]+: (?<path>/[^':]*): (?<message>.+)$").expect("valid shell error regex")
});

static QUOTED_SHELL_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.\-\[\]/]+: [^']*'(?<path>/[^']+)': (?<message>.+)$")
        .expect("valid quoted shell error regex")
});

static EMBEDDED_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'(?<quoted>/[^']+)'|(?<bare>/[^\s:']+)").expect("valid embedded path regex")
});

/// Shape a line was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    TransferProgress,
    Stats,
    Hash,
    TransferError,
    ShellError,
    Unrecognized,
}

/// Classify one output line. Blank lines yield `None`.
pub fn classify_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        return Some(progress_event(&caps));
    }
    if let Some(stats) = parse_stats_line(line) {
        return Some(ProgressEvent::Stats(stats));
    }
    if let Some((hash, path)) = parse_hash_line(line) {
        return Some(ProgressEvent::HashResult {
            path,
            outcome: HashOutcome::Match,
            hash: Some(hash),
        });
    }
    if let Some(caps) = TRANSFER_ERROR_RE.captures(line) {
        let message = collapse_separators(caps["message"].trim());
        let path = embedded_path(&message);
        return Some(ProgressEvent::TransferError { path, message });
    }
    if let Some(caps) = SHELL_ERROR_RE
        .captures(line)
        .or_else(|| QUOTED_SHELL_ERROR_RE.captures(line))
    {
        return Some(ProgressEvent::ShellError {
            path: collapse_separators(caps["path"].trim_end()),
            message: caps["message"].trim().to_string(),
        });
    }

    tracing::warn!(target: "devq::parse", line, "unrecognized output line");
    Some(ProgressEvent::Unrecognized {
        line: line.to_string(),
    })
}

impl LineKind {
    /// Kind of an already classified event.
    pub fn of(event: &ProgressEvent) -> Self {
        match event {
            ProgressEvent::TransferProgress { .. } => Self::TransferProgress,
            ProgressEvent::Stats(_) => Self::Stats,
            ProgressEvent::HashResult { .. } => Self::Hash,
            ProgressEvent::TransferError { .. } => Self::TransferError,
            ProgressEvent::ShellError { .. } => Self::ShellError,
            ProgressEvent::Unrecognized { .. } => Self::Unrecognized,
        }
    }
}

fn progress_event(caps: &Captures<'_>) -> ProgressEvent {
    let total_percent = caps
        .name("total")
        .and_then(|m| m.as_str().parse::<u8>().ok());
    let current = if let Some(pct) = caps.name("current") {
        pct.as_str().parse().ok().map(TransferAmount::Percent)
    } else {
        caps.name("bytes")
            .and_then(|m| m.as_str().parse().ok())
            .map(TransferAmount::Bytes)
    };

    ProgressEvent::TransferProgress {
        path: caps["file"].to_string(),
        total_percent,
        current,
    }
}

/// Parse an end-of-transfer statistics line.
pub fn parse_stats_line(line: &str) -> Option<StatsSummary> {
    let caps = STATS_RE.captures(line)?;
    Some(StatsSummary {
        path: caps["path"].to_string(),
        files_transferred: caps["files"].parse().ok()?,
        files_skipped: caps["skipped"].parse().ok()?,
        total_bytes: caps.name("bytes").and_then(|m| m.as_str().parse().ok()),
        total_time: caps.name("time").and_then(|m| m.as_str().parse().ok()),
        average_rate: caps.name("rate").and_then(|m| m.as_str().parse().ok()),
    })
}

/// Parse a `<hash> <path>` line as printed by `md5sum`.
///
/// Returns the lower-cased hash and the path.
pub fn parse_hash_line(line: &str) -> Option<(String, String)> {
    let caps = HASH_RE.captures(line.trim_end())?;
    Some((caps["hash"].to_ascii_lowercase(), caps["path"].to_string()))
}

fn embedded_path(message: &str) -> Option<String> {
    let caps = EMBEDDED_PATH_RE.captures(message)?;
    caps.name("quoted")
        .or_else(|| caps.name("bare"))
        .map(|m| m.as_str().to_string())
}
