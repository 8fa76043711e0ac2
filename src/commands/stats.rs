use anyhow::Result;
use chrono::{Local, TimeZone};
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::error::{ChannelError, ViewerError};
use crate::export::ledger;
use crate::export::paths::OutputLayout;
use crate::export::pipeline;
use crate::export::source::ExportSource;
use crate::export::stats::ChannelStats;
use crate::export::workspace::WorkspaceContext;

#[derive(Debug, Clone, Default)]
pub struct StatsOptions {
    pub export: PathBuf,
    pub channels: Vec<String>,
    pub output: Option<PathBuf>,
}

fn format_epoch(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| Local.timestamp_opt(s, 0).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Read-only per-channel statistics; never touches the network.
pub fn run(opts: &StatsOptions) -> Result<CommandReport> {
    let source = ExportSource::open(&opts.export)?;
    let workspace = WorkspaceContext::load(source.root())?;
    let mut report = CommandReport::new("stats");

    let info = workspace.export_info(source.archive_stem());
    report.detail(format!("workspace={}", info.workspace));
    if let Some(range) = &info.date_range {
        report.detail(format!("date_range={range}"));
    }

    let channels: Vec<String> = if opts.channels.is_empty() {
        workspace.channel_names().map(str::to_string).collect()
    } else {
        for name in &opts.channels {
            if !workspace.has_channel(name) {
                return Err(ViewerError::UnknownChannel(name.clone()).into());
            }
        }
        opts.channels.clone()
    };

    let layout = opts.output.as_ref().map(OutputLayout::new);
    let records = match &layout {
        Some(layout) => ledger::read_ledger(&layout.ledger())?,
        None => Vec::new(),
    };

    for name in &channels {
        let loaded = match pipeline::load_channel(name, &workspace.channel_dir(name)) {
            Ok(loaded) => loaded,
            Err(err) => {
                report.issue(format!("channel {name}: [{}] {err}", ChannelError::code(&err)));
                continue;
            }
        };
        let stats = ChannelStats::collect(name, &loaded, &workspace);
        report.detail(format!(
            "channel {name}: {} messages, {} threads, {} files, {}, users: {}",
            stats.messages,
            stats.threads,
            stats.files,
            stats.date_range().unwrap_or_else(|| "no activity".to_string()),
            stats.user_summary(4),
        ));

        if let Some(last) = ledger::last_for(&records, name) {
            let current = ledger::fingerprint(&loaded.day_files())?;
            let freshness = if current == last.fingerprint { "fresh" } else { "stale" };
            report.detail(format!(
                "channel {name}: last converted {} ({freshness})",
                format_epoch(last.converted_at_epoch_secs)
            ));
        } else if layout.is_some() {
            report.detail(format!("channel {name}: never converted"));
        }
    }

    Ok(report)
}
