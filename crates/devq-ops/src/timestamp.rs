//! Changing an item's modification time.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use devq_core::{DeviceId, path};
use devq_shell::escape_shell;
use regex::Regex;

use crate::EngineContext;
use crate::operation::{Operation, OperationTask, Outcome};

static NAME_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\D)(?:(?<date>\d{8})(?:[-_](?<time>\d{6})\D|\D\D)|(?<dnt>\d{4}(?:[-_]\d{2}){5})\D)",
    )
    .expect("valid name date regex")
});

/// Set the modification time of `source`.
///
/// With `time` of `None` the date is taken from the file name when the
/// operation runs.
pub fn change_timestamp_operation(
    device: DeviceId,
    source: impl Into<String>,
    time: Option<NaiveDateTime>,
) -> Operation {
    Operation::new(device, source, None, OperationTask::ChangeTimestamp { time })
}

/// Date embedded in a file name such as `IMG_20230714_183012.jpg` or
/// `Screenshot_2023-07-14-18-30-12.png`.
///
/// A date without a time yields midnight.
pub fn date_from_name(name: &str) -> Option<NaiveDateTime> {
    let caps = NAME_DATE_RE.captures(name)?;

    if let Some(date) = caps.name("date") {
        let date = NaiveDate::parse_from_str(date.as_str(), "%Y%m%d").ok()?;
        let time = caps
            .name("time")
            .and_then(|t| NaiveTime::parse_from_str(t.as_str(), "%H%M%S").ok())
            .unwrap_or(NaiveTime::MIN);
        return Some(date.and_time(time));
    }

    let dnt = caps.name("dnt")?.as_str().replace('_', "-");
    NaiveDateTime::parse_from_str(&dnt, "%Y-%m-%d-%H-%M-%S").ok()
}

pub(crate) async fn execute(op: &Operation, ctx: &EngineContext) -> Outcome {
    let OperationTask::ChangeTimestamp { time } = op.task() else {
        return Outcome::Failed(format!("{} is not a timestamp change", op.operation_type()));
    };
    let name = path::file_name(op.source());
    let Some(time) = (*time).or_else(|| date_from_name(name)) else {
        return Outcome::Failed(format!("No date found in {name}"));
    };

    op.shell_step(
        ctx,
        format!(
            "touch -m -t {} {}",
            time.format("%Y%m%d%H%M.%S"),
            escape_shell(op.source())
        ),
    )
    .await
}
