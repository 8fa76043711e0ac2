use std::cmp::Reverse;
use std::fmt::Write;

use crate::export::render_html::escape_html;
use crate::export::stats::ChannelStats;
use crate::export::workspace::ExportInfo;

const USERS_SHOWN: usize = 4;
const NO_SUMMARY: &str = "No summary has been generated yet.";

/// One row of the index page.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub stats: ChannelStats,
    pub summary: Option<String>,
}

/// Most recently active month first, then name descending; channels with no
/// activity at all sink to the bottom.
pub fn sort_entries(entries: &mut [IndexEntry]) {
    entries.sort_by_key(|e| {
        Reverse((
            e.stats.most_recent_month().unwrap_or("0000-00").to_string(),
            e.stats.name.clone(),
        ))
    });
}

fn parse_month(key: &str) -> Option<(i32, u32)> {
    let (year, month) = key.split_once('-')?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year.parse().ok()?, month))
}

/// Every `YYYY-MM` from the earliest to the latest active month across all
/// channels.
pub fn month_axis(entries: &[IndexEntry]) -> Vec<String> {
    let first = entries.iter().filter_map(|e| e.stats.first_month()).min();
    let last = entries.iter().filter_map(|e| e.stats.most_recent_month()).max();
    let (Some((mut y, mut m)), Some(end)) = (first.and_then(parse_month), last.and_then(parse_month)) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    while (y, m) <= end {
        out.push(format!("{y:04}-{m:02}"));
        if m == 12 {
            y += 1;
            m = 1;
        } else {
            m += 1;
        }
    }
    out
}

fn activity_bars(out: &mut String, stats: &ChannelStats, axis: &[String], busiest: usize) {
    out.push_str(r#"<div class="activity-graph">"#);
    for month in axis {
        let count = stats.monthly.get(month).copied().unwrap_or(0);
        let height = if busiest > 0 { count * 100 / busiest } else { 0 };
        let _ = write!(
            out,
            r#"<div class="activity-bar" style="height: {height}%" title="{month}: {count} messages"></div>"#
        );
    }
    out.push_str("</div>");
}

pub fn render_index_page(info: &ExportInfo, entries: &[IndexEntry]) -> String {
    let axis = month_axis(entries);
    let busiest = entries
        .iter()
        .flat_map(|e| e.stats.monthly.values().copied())
        .max()
        .unwrap_or(0);

    let workspace = escape_html(&info.workspace);
    let mut out = String::new();
    let _ = write!(
        out,
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Slack Export - {workspace}</title>
<style>
    body {{ font-family: Arial, sans-serif; margin: 0 auto; padding: 20px; max-width: 1200px; background: #f5f5f5; }}
    .channel-item {{ margin: 15px 0; padding: 20px; border-radius: 8px; background: white; display: flex; gap: 20px; }}
    .channel-content {{ flex: 1; min-width: 0; }}
    .channel-name {{ font-size: 1.2em; font-weight: bold; color: #1264A3; text-decoration: none; }}
    .channel-stats {{ color: #666; margin-left: 10px; font-size: 0.9em; }}
    .details {{ margin: 10px 0; padding: 15px; background: #f8f9fa; border-radius: 6px; font-size: 0.9em; }}
    .activity-graph {{ display: flex; align-items: flex-end; height: 40px; gap: 1px; width: 300px; }}
    .activity-bar {{ flex: 1; background-color: #1264A3; opacity: 0.7; }}
</style>
</head>
<body>
<h1>{workspace}</h1>
"#
    );
    if let Some(url) = &info.workspace_url {
        let url = escape_html(url);
        let _ = writeln!(out, r#"<p><a href="{url}">{url}</a></p>"#);
    }
    if let Some(range) = &info.date_range {
        let _ = writeln!(out, r#"<p class="export-range">{}</p>"#, escape_html(range));
    }
    out.push_str("<ul id=\"channels-container\">\n");

    for entry in entries {
        let stats = &entry.stats;
        let name = escape_html(&stats.name);
        let range = stats
            .date_range()
            .map(|r| format!(" &bull; {}", escape_html(&r)))
            .unwrap_or_default();
        let all_users = if stats.users.is_empty() {
            "No messages".to_string()
        } else {
            stats
                .users
                .iter()
                .map(|u| format!("{} ({})", escape_html(&u.name), u.messages))
                .collect::<Vec<_>>()
                .join("<br>")
        };
        let summary = escape_html(entry.summary.as_deref().unwrap_or(NO_SUMMARY));
        let _ = write!(
            out,
            r#"<li class="channel-item" data-name="{name}" data-recent-activity="{recent}" data-message-count="{messages}">
<div class="channel-content">
<a href="{name}/index.html" class="channel-name">#{name}</a>
<span class="channel-stats">{messages} messages &bull; {threads} threads &bull; {files} files{range}</span>
<div class="user-list">{users}</div>
<details class="details"><summary>Details</summary><strong>Users:</strong><br>{all_users}<br><br><strong>Summary:</strong><br>{summary}</details>
</div>
"#,
            recent = stats.most_recent_month().unwrap_or_default(),
            messages = stats.messages,
            threads = stats.threads,
            files = stats.files,
            users = escape_html(&stats.user_summary(USERS_SHOWN)),
        );
        activity_bars(&mut out, stats, &axis, busiest);
        out.push_str("\n</li>\n");
    }

    out.push_str("</ul>\n</body>\n</html>\n");
    out
}
