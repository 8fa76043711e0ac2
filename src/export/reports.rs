use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::export::model::{Timestamp, format_local};
use crate::export::resolver::FileEvent;

pub const REPORT_HEADER: &str = "timestamp,file_id,mode";
const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// CSV body for one event log, oldest first. Events whose timestamp does not
/// parse keep their raw text and sort first.
pub fn render_report(events: &[FileEvent]) -> String {
    let mut sorted: Vec<&FileEvent> = events.iter().collect();
    sorted.sort_by_key(|e| Timestamp::parse(&e.timestamp));

    let mut out = String::from(REPORT_HEADER);
    out.push('\n');
    for event in sorted {
        let when = format_local(&event.timestamp, REPORT_TIME_FORMAT).unwrap_or_else(|| event.timestamp.clone());
        out.push_str(&format!("{},{},{}\n", when, csv_field(&event.identity), event.outcome.as_str()));
    }
    out
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Write `events` to `path` when there are any. Returns whether a file was
/// written.
pub fn write_report(path: &Path, events: &[FileEvent]) -> Result<bool> {
    if events.is_empty() {
        return Ok(false);
    }
    fs::write(path, render_report(events)).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
