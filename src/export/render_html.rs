use serde_json::Value;
use std::fmt::Write;

use crate::export::model::{SENTINEL_TIMESTAMP, format_local};
use crate::export::fetch::is_http_url;
use crate::export::resolver::{ResolvedAttachment, ResolvedMessage, Resolution};
use crate::export::threads::Transcript;
use crate::export::workspace::WorkspaceContext;

const IMAGE_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

const CHANNEL_STYLE: &str = r#"
    body { font-family: Arial, sans-serif; margin: 20px; }
    nav { margin-bottom: 20px; }
    .message { margin: 10px 0; padding: 10px; border-bottom: 1px solid #eee; }
    .timestamp { color: #666; font-size: 0.8em; }
    .user { font-weight: bold; color: #1264A3; }
    .text { white-space: pre-line; word-wrap: break-word; margin: 8px 0; }
    .file { margin: 10px 0; }
    .failed-download { color: #666; font-style: italic; }
    .image-container { margin: 10px 0; max-width: 800px; }
    .message-image { max-width: 100%; height: auto; border-radius: 4px; display: block; margin-bottom: 8px; }
    .image-caption { font-size: 0.9em; color: #666; }
    .file-link a { color: #1264A3; text-decoration: none; padding: 6px 12px; background: #f8f9fa; border-radius: 4px; }
    .thread-toggle { color: #1264A3; font-size: 0.9em; cursor: pointer; }
    .thread-container { margin-left: 20px; border-left: 2px solid #eee; padding-left: 10px; display: none; }
    .thread-container.expanded { display: block; }
    .thread-controls { margin-bottom: 20px; padding: 10px; background: #f8f8f8; border-radius: 5px; }
    .thread-controls a { color: #1264A3; margin-right: 20px; cursor: pointer; }
"#;

const CHANNEL_SCRIPT: &str = r#"
    function setThread(id, expanded) {
        const container = document.getElementById('thread-' + id);
        const toggle = document.getElementById('toggle-' + id);
        const replies = toggle.getAttribute('data-replies');
        container.classList.toggle('expanded', expanded);
        toggle.textContent = (expanded ? 'Hide' : 'Show') + ' thread (' + replies + ' replies)';
    }
    function toggleThread(id) {
        const container = document.getElementById('thread-' + id);
        setThread(id, !container.classList.contains('expanded'));
    }
    function setAllThreads(expanded) {
        document.querySelectorAll('.thread-toggle').forEach(t => setThread(t.dataset.thread, expanded));
    }
"#;

pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Local `%Y-%m-%d %H:%M:%S`, or `[No Timestamp]` for the sentinel.
pub fn display_timestamp(raw: &str) -> String {
    if raw == SENTINEL_TIMESTAMP {
        return "[No Timestamp]".to_string();
    }
    format_local(raw, "%Y-%m-%d %H:%M:%S").unwrap_or_else(|| raw.to_string())
}

fn dom_id(ts: &str) -> String {
    ts.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '-' }).collect()
}

/// Rich-text blocks as inline HTML. Unknown block and element kinds render
/// as nothing.
pub fn render_blocks(blocks: &[Value], workspace: &WorkspaceContext) -> String {
    let mut out = String::new();
    let rich_text = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("rich_text"));
    for block in rich_text {
        let sections = block
            .get("elements")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|e| e.get("type").and_then(Value::as_str) == Some("rich_text_section"));
        for section in sections {
            let items = section.get("elements").and_then(Value::as_array).into_iter().flatten();
            for item in items {
                let field = |key: &str| item.get(key).and_then(Value::as_str);
                match field("type") {
                    Some("text") => out.push_str(&escape_html(field("text").unwrap_or_default())),
                    Some("link") => {
                        let url = field("url").unwrap_or_default();
                        let label = field("text").unwrap_or(url);
                        let _ = write!(out, r#"<a href="{}">{}</a>"#, escape_html(url), escape_html(label));
                    }
                    Some("emoji") => {
                        let _ = write!(out, ":{}:", escape_html(field("name").unwrap_or_default()));
                    }
                    Some("user") => {
                        let id = field("user_id").unwrap_or_default();
                        let _ = write!(out, "@{}", escape_html(workspace.username(id)));
                    }
                    _ => {}
                }
            }
        }
    }
    out
}

fn is_image(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let lower = lower.split(['?', '#']).next().unwrap_or_default();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn render_attachment(out: &mut String, attachment: &ResolvedAttachment) {
    let name = escape_html(attachment.display_name());
    out.push_str(r#"<div class="file">"#);
    if attachment.download_failed() {
        let reason = attachment.failure_reason().unwrap_or("unknown reason");
        let _ = write!(
            out,
            r#"<div class="failed-download">File download failed: {name} ({})</div>"#,
            escape_html(reason)
        );
    }
    // remote links only for http(s)
    let href = attachment
        .local_path()
        .filter(|path| matches!(attachment.resolution, Resolution::Local { .. }) || is_http_url(path));
    match href {
        None if attachment.download_failed() => {}
        None => {
            let _ = write!(out, r#"<div class="file-link">{name}</div>"#);
        }
        Some(path) if is_image(path) => {
            let path = escape_html(path);
            let _ = write!(
                out,
                r#"<div class="image-container"><img src="{path}" alt="{name}" class="message-image"><div class="image-caption"><a href="{path}" target="_blank">{name}</a></div></div>"#
            );
        }
        Some(path) => {
            let _ = write!(
                out,
                r#"<div class="file-link"><a href="{}" target="_blank">{name}</a></div>"#,
                escape_html(path)
            );
        }
    }
    out.push_str("</div>");
}

fn render_message(out: &mut String, resolved: &ResolvedMessage, workspace: &WorkspaceContext) {
    let message = &resolved.message;
    let user = workspace.username(message.author_id.as_deref().unwrap_or_default());
    let _ = write!(
        out,
        r#"<div class="message"><div class="timestamp">{}</div><div class="user">{}</div>"#,
        display_timestamp(message.timestamp_or_sentinel()),
        escape_html(user)
    );

    let from_blocks = render_blocks(&message.blocks, workspace);
    let body = if from_blocks.is_empty() {
        escape_html(&workspace.expand_mentions(&message.text))
    } else {
        from_blocks
    };
    let _ = write!(out, r#"<div class="text">{body}</div>"#);

    for attachment in &resolved.attachments {
        render_attachment(out, attachment);
    }
    out.push_str("</div>\n");
}

/// Full channel page: top-level messages in order, each real thread folded
/// into a toggle below its parent.
pub fn render_channel_page(channel: &str, transcript: &Transcript, workspace: &WorkspaceContext) -> String {
    let channel_html = escape_html(channel);
    let thread_count = transcript.expandable_thread_count();
    let mut out = String::new();
    let _ = write!(
        out,
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Slack Export - #{channel_html}</title>
<style>{CHANNEL_STYLE}</style>
<script>{CHANNEL_SCRIPT}</script>
</head>
<body>
<nav><a href="../index.html">&larr; Back to Channels</a></nav>
<h1>#{channel_html}</h1>
<div class="thread-controls">
<a onclick="setAllThreads(true)">Expand all {thread_count} threads</a>
<a onclick="setAllThreads(false)">Collapse all {thread_count} threads</a>
</div>
"#
    );

    for resolved in transcript.top_level() {
        render_message(&mut out, resolved, workspace);

        let replies = transcript.replies_of(resolved);
        if replies.is_empty() {
            continue;
        }
        let id = dom_id(resolved.message.timestamp_or_sentinel());
        let count = resolved.reply_count;
        let _ = write!(
            out,
            r#"<div><a class="thread-toggle" id="toggle-{id}" data-thread="{id}" data-replies="{count}" onclick="toggleThread('{id}')">Show thread ({count} replies)</a>
<div class="thread-container" id="thread-{id}">
"#
        );
        for reply in replies {
            render_message(&mut out, reply, workspace);
        }
        out.push_str("</div></div>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}
