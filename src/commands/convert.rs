use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::error::{ChannelError, ViewerError};
use crate::export::config::{self, ViewerConfig};
use crate::export::fetch::{Fetcher, HttpFetcher};
use crate::export::index_page::{self, IndexEntry};
use crate::export::ledger::{self, RunRecord};
use crate::export::lock::OutputLock;
use crate::export::paths::OutputLayout;
use crate::export::pipeline;
use crate::export::render_html;
use crate::export::render_text;
use crate::export::reports;
use crate::export::source::ExportSource;
use crate::export::stats::ChannelStats;
use crate::export::util::{now_epoch_secs, parallel_map};
use crate::export::warn::{self, WarnEvent};
use crate::export::workspace::{ExportInfo, WorkspaceContext};

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub export: PathBuf,
    pub output: PathBuf,
    pub channels: Vec<String>,
    pub channels_existing: bool,
    pub channel_workers: Option<usize>,
    pub fetch_workers: Option<usize>,
}

/// What a converted channel leaves behind for the index page and ledger.
struct ChannelDone {
    entry: IndexEntry,
    record: RunRecord,
}

pub fn run(opts: &ConvertOptions) -> Result<CommandReport> {
    let mut cfg = config::load_config()?;
    if let Some(n) = opts.channel_workers {
        cfg.workers.channels = n;
    }
    if let Some(n) = opts.fetch_workers {
        cfg.workers.fetches = n;
    }
    config::validate(&cfg)?;

    let source = ExportSource::open(&opts.export)?;
    let workspace = WorkspaceContext::load(source.root())?;
    let layout = OutputLayout::new(&opts.output);
    let _lock = OutputLock::acquire(&layout.root)?;
    let channels = select_channels(&workspace, &layout, opts)?;
    let fetcher = HttpFetcher::new(&cfg.fetch)?;

    let info = workspace.export_info(source.archive_stem());
    let mut report = convert_channels(&workspace, &info, &layout, &fetcher, &channels, &cfg)?;
    report.detail(format!("workspace={}", info.workspace));
    Ok(report)
}

fn select_channels(
    workspace: &WorkspaceContext,
    layout: &OutputLayout,
    opts: &ConvertOptions,
) -> Result<Vec<String>> {
    if !opts.channels.is_empty() {
        for name in &opts.channels {
            if !workspace.has_channel(name) {
                return Err(ViewerError::UnknownChannel(name.clone()).into());
            }
        }
        return Ok(opts.channels.clone());
    }

    if opts.channels_existing {
        let existing: Vec<String> = layout
            .existing_channels()
            .into_iter()
            .filter(|name| {
                let known = workspace.has_channel(name);
                if !known {
                    tracing::warn!(channel = %name, "output directory has no matching export channel");
                }
                known
            })
            .collect();
        if existing.is_empty() {
            anyhow::bail!("no existing channel directories in {}", layout.root.display());
        }
        return Ok(existing);
    }

    Ok(workspace.channel_names().map(str::to_string).collect())
}

/// Convert `channels` on the channel pool, then write the index page and
/// ledger from the channels that made it.
pub fn convert_channels(
    workspace: &WorkspaceContext,
    info: &ExportInfo,
    layout: &OutputLayout,
    fetcher: &dyn Fetcher,
    channels: &[String],
    cfg: &ViewerConfig,
) -> Result<CommandReport> {
    tracing::info!(
        channels = channels.len(),
        channel_workers = cfg.workers.channels,
        fetch_workers = cfg.workers.fetches,
        output = %layout.root.display(),
        "starting conversion"
    );

    let results = parallel_map(channels.to_vec(), cfg.workers.channels, |name| {
        let outcome = convert_channel(workspace, layout, fetcher, &name, cfg.workers.fetches);
        (name, outcome)
    });

    let mut report = CommandReport::new("convert");
    let mut entries = Vec::new();
    for (name, outcome) in results {
        match outcome {
            Ok((done, channel_report)) => {
                report.merge(channel_report);
                ledger::append_record(&layout.ledger(), &done.record)?;
                entries.push(done.entry);
            }
            Err(err) => {
                let code = err
                    .downcast_ref::<ChannelError>()
                    .map(ChannelError::code)
                    .unwrap_or("E000_CHANNEL_FAILED");
                warn::emit(WarnEvent {
                    code,
                    stage: "convert",
                    channel: &name,
                    subject: &name,
                    reason: &format!("{err:#}"),
                });
                report.issue(format!("channel {name}: [{code}] {err:#}"));
            }
        }
    }

    index_page::sort_entries(&mut entries);
    let index_path = layout.index_html();
    fs::write(&index_path, index_page::render_index_page(info, &entries))
        .with_context(|| format!("failed to write {}", index_path.display()))?;
    report.detail(format!("index={}", index_path.display()));
    tracing::info!(path = %index_path.display(), channels = entries.len(), "wrote index page");
    Ok(report)
}

fn write_output(path: PathBuf, body: String) -> Result<(), ChannelError> {
    fs::write(&path, body).map_err(|source| ChannelError::OutputWrite { path, source })
}

fn convert_channel(
    workspace: &WorkspaceContext,
    layout: &OutputLayout,
    fetcher: &dyn Fetcher,
    name: &str,
    fetch_workers: usize,
) -> Result<(ChannelDone, CommandReport)> {
    let loaded = pipeline::load_channel(name, &workspace.channel_dir(name))?;

    let out_dir = layout.channel_dir(name);
    fs::create_dir_all(&out_dir).map_err(|source| ChannelError::OutputWrite {
        path: out_dir.clone(),
        source,
    })?;
    let stats = ChannelStats::collect(name, &loaded, workspace);
    let resolved = pipeline::process_channel(name, loaded, &out_dir, fetcher, fetch_workers)?;
    let fingerprint = ledger::fingerprint(&resolved.day_files)?;

    write_output(
        layout.channel_html(name),
        render_html::render_channel_page(name, &resolved.transcript, workspace),
    )?;
    write_output(
        layout.channel_text(name),
        render_text::render_transcript(name, &resolved.transcript, workspace),
    )?;

    let state = &resolved.state;
    if reports::write_report(&layout.missing_report(name), state.missing())? {
        tracing::info!(channel = name, count = state.missing().len(), "missing files reported");
    } else {
        tracing::info!(channel = name, "no missing files");
    }
    if reports::write_report(&layout.downloaded_report(name), state.downloaded())? {
        tracing::info!(channel = name, count = state.downloaded().len(), "available files reported");
    } else {
        tracing::info!(channel = name, "no files downloaded");
    }

    let summary_path = layout.summary(name);
    let summary = match fs::read_to_string(&summary_path) {
        Ok(raw) => Some(raw.trim().to_string()),
        Err(_) => None,
    };

    let record = RunRecord {
        channel: name.to_string(),
        fingerprint,
        messages: resolved.transcript.messages().len(),
        threads: resolved.transcript.expandable_thread_count(),
        downloaded: state.downloaded().len(),
        missing: state.missing().len(),
        converted_at_epoch_secs: now_epoch_secs()?,
    };

    let mut report = CommandReport::new("convert");
    report.detail(format!(
        "channel {name}: {} messages, {} threads, {} files available, {} missing, {} fetched",
        record.messages,
        record.threads,
        record.downloaded,
        record.missing,
        state.fetch_attempts()
    ));

    Ok((
        ChannelDone {
            entry: IndexEntry { stats, summary },
            record,
        },
        report,
    ))
}
