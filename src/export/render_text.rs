use std::fmt::Write;

use crate::export::model::format_local;
use crate::export::resolver::{ResolvedAttachment, ResolvedMessage};
use crate::export::threads::Transcript;
use crate::export::workspace::WorkspaceContext;

fn file_line(attachment: &ResolvedAttachment) -> String {
    let name = attachment.display_name();
    match (attachment.local_path(), attachment.failure_reason()) {
        (Some(path), _) => format!("[File: {name} -> {path}]"),
        (None, Some(reason)) => format!("[File: {name} ({reason})]"),
        (None, None) => format!("[File: {name} (no local path)]"),
    }
}

fn write_message(out: &mut String, workspace: &WorkspaceContext, resolved: &ResolvedMessage, indent: &str) {
    let message = &resolved.message;
    let user = workspace.username(message.author_id.as_deref().unwrap_or_default());
    let text = workspace.expand_mentions(&message.text);
    let _ = writeln!(out, "{indent}{user}:");
    let _ = writeln!(out, "{indent}    {text}");
    for attachment in &resolved.attachments {
        let _ = writeln!(out, "{indent}    {}", file_line(attachment));
    }
}

/// Plain-text transcript: top-level messages under day headers, each real
/// thread's replies indented below its parent.
pub fn render_transcript(channel: &str, transcript: &Transcript, workspace: &WorkspaceContext) -> String {
    let mut out = format!("Channel: #{channel}\n\n");
    let mut current_day: Option<String> = None;

    for resolved in transcript.top_level() {
        let raw_ts = resolved.message.timestamp_or_sentinel();
        let day = format_local(raw_ts, "%Y-%m-%d");
        if day != current_day {
            let header = format_local(raw_ts, "%B %d, %Y").unwrap_or_else(|| "Unknown date".to_string());
            let _ = write!(out, "\n=== {header} ===\n\n");
            current_day = day;
        }

        write_message(&mut out, workspace, resolved, "");

        let replies = transcript.replies_of(resolved);
        if !replies.is_empty() {
            out.push_str("    Thread replies:\n");
            for reply in replies {
                write_message(&mut out, workspace, reply, "        ");
            }
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
