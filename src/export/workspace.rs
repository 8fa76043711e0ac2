use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ViewerError;
use crate::export::pipeline;
use crate::export::stats::format_month_range;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

impl User {
    /// display_name, then real_name, then handle; empty strings do not count.
    pub fn preferred_name(&self) -> Option<&str> {
        let profile = self.profile.as_ref();
        [
            profile.and_then(|p| p.display_name.as_deref()),
            profile.and_then(|p| p.real_name.as_deref()),
            self.name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    #[serde(default)]
    pub is_org_shared: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct Canvas {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInfo {
    pub workspace: String,
    pub workspace_url: Option<String>,
    pub date_range: Option<String>,
}

/// Users and channels of one export, loaded once and shared by reference.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    root: PathBuf,
    users: HashMap<String, User>,
    channels: Vec<ChannelInfo>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

impl WorkspaceContext {
    pub fn load(root: &Path) -> Result<Self> {
        let channels_path = root.join("channels.json");
        let users_path = root.join("users.json");
        if !channels_path.is_file() {
            return Err(ViewerError::ExportLayout(format!("missing {}", channels_path.display())).into());
        }
        if !users_path.is_file() {
            return Err(ViewerError::ExportLayout(format!("missing {}", users_path.display())).into());
        }

        let channels: Vec<ChannelInfo> = read_json(&channels_path)?;
        let users: Vec<User> = read_json(&users_path)?;
        tracing::debug!(channels = channels.len(), users = users.len(), "loaded workspace");
        Ok(Self::from_parts(root, users, channels))
    }

    pub fn from_parts(root: &Path, users: Vec<User>, channels: Vec<ChannelInfo>) -> Self {
        Self {
            root: root.to_path_buf(),
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            channels,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c.name == name)
    }

    pub fn channel_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Best human name for `id`; unknown ids come back unchanged.
    pub fn username<'a>(&'a self, id: &'a str) -> &'a str {
        self.users
            .get(id)
            .and_then(User::preferred_name)
            .unwrap_or(id)
    }

    /// Rewrites `<@U123>` (and `<@U123|label>`) into `@name` for known users.
    pub fn expand_mentions(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("<@") {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            let Some(end) = tail.find('>') else {
                out.push_str(tail);
                return out;
            };
            let inner = &tail[2..end];
            let id = inner.split('|').next().unwrap_or(inner);
            match self.users.get(id) {
                Some(user) => {
                    out.push('@');
                    out.push_str(user.preferred_name().unwrap_or(id));
                }
                None => out.push_str(&tail[..=end]),
            }
            rest = &tail[end + 1..];
        }
        out.push_str(rest);
        out
    }

    /// Workspace name and covered date range for page headers.
    ///
    /// `source_name` is the export file name (without `.zip`) when the export
    /// came from an archive.
    pub fn export_info(&self, source_name: Option<&str>) -> ExportInfo {
        let mut info = ExportInfo {
            workspace: "Unknown Workspace".to_string(),
            workspace_url: self.workspace_url(),
            date_range: None,
        };

        if let Some((workspace, range)) = source_name.and_then(split_archive_name) {
            if !workspace.is_empty() {
                info.workspace = workspace.to_string();
            }
            if !range.is_empty() {
                info.date_range = Some(range.to_string());
            }
        }

        let shared_prefix = self
            .channels
            .first()
            .filter(|c| c.is_org_shared.is_some())
            .and_then(|c| c.name.split('-').next())
            .filter(|prefix| !prefix.is_empty());
        if let Some(prefix) = shared_prefix {
            info.workspace = prefix.to_string();
        }

        if info.date_range.is_none() {
            info.date_range = self.day_span().map(|(first, last)| format_month_range(first, last));
        }
        info
    }

    fn workspace_url(&self) -> Option<String> {
        let path = self.root.join("canvases.json");
        let canvases: Vec<Canvas> = read_json(&path).ok()?;
        canvases
            .iter()
            .filter_map(|c| c.url.as_deref())
            .find(|url| url.contains("slack.com"))
            .and_then(|url| url.rsplit('/').next())
            .filter(|team| !team.is_empty())
            .map(|team| format!("https://{team}.slack.com"))
    }

    /// Earliest and latest day-file dates across every channel directory.
    fn day_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut span: Option<(NaiveDate, NaiveDate)> = None;
        for channel in self.channel_names() {
            let Ok(days) = pipeline::list_day_files(channel, &self.channel_dir(channel)) else {
                continue;
            };
            for day in days {
                span = Some(match span {
                    None => (day.date, day.date),
                    Some((lo, hi)) => (lo.min(day.date), hi.max(day.date)),
                });
            }
        }
        span
    }
}

/// `Acme export Jan 1 2024 - Mar 1 2024` splits around the first
/// case-insensitive `export`.
fn split_archive_name(name: &str) -> Option<(&str, &str)> {
    let pos = name.to_ascii_lowercase().find("export")?;
    Some((name[..pos].trim(), name[pos + "export".len()..].trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn user(id: &str, name: Option<&str>, display: Option<&str>, real: Option<&str>) -> User {
        User {
            id: id.to_string(),
            name: name.map(str::to_string),
            profile: Some(UserProfile {
                display_name: display.map(str::to_string),
                real_name: real.map(str::to_string),
            }),
        }
    }

    fn ctx(root: &Path, channels: &[(&str, Option<bool>)]) -> WorkspaceContext {
        WorkspaceContext::from_parts(
            root,
            vec![
                user("U1", Some("ada"), Some("Ada L"), Some("Ada Lovelace")),
                user("U2", Some("bob"), Some(""), Some("Bob Builder")),
                user("U3", Some("cy"), None, None),
            ],
            channels
                .iter()
                .map(|(name, shared)| ChannelInfo {
                    name: name.to_string(),
                    is_org_shared: *shared,
                })
                .collect(),
        )
    }

    #[test]
    fn username_fallback_order() {
        let tmp = tempdir().expect("tempdir");
        let ws = ctx(tmp.path(), &[]);
        assert_eq!(ws.username("U1"), "Ada L");
        assert_eq!(ws.username("U2"), "Bob Builder");
        assert_eq!(ws.username("U3"), "cy");
        assert_eq!(ws.username("U404"), "U404");
    }

    #[test]
    fn mentions_expand_for_known_users_only() {
        let tmp = tempdir().expect("tempdir");
        let ws = ctx(tmp.path(), &[]);
        assert_eq!(
            ws.expand_mentions("hi <@U1> and <@U9>, ping <@U2|bob> <@"),
            "hi @Ada L and <@U9>, ping @Bob Builder <@"
        );
    }

    #[test]
    fn export_info_from_archive_name() {
        let tmp = tempdir().expect("tempdir");
        let ws = ctx(tmp.path(), &[("general", None)]);
        let info = ws.export_info(Some("Acme Slack export Jan 1 2024 - Mar 1 2024"));
        assert_eq!(info.workspace, "Acme Slack");
        assert_eq!(info.date_range.as_deref(), Some("Jan 1 2024 - Mar 1 2024"));
        assert_eq!(info.workspace_url, None);
    }

    #[test]
    fn export_info_falls_back_to_day_files() {
        let tmp = tempdir().expect("tempdir");
        for (channel, day) in [("general", "2024-01-05"), ("random", "2024-03-09")] {
            let dir = tmp.path().join(channel);
            fs::create_dir_all(&dir).expect("mkdir");
            fs::write(dir.join(format!("{day}.json")), "[]").expect("write");
        }
        let ws = ctx(tmp.path(), &[("acme-general", Some(false)), ("general", None), ("random", None)]);
        let info = ws.export_info(None);
        assert_eq!(info.workspace, "acme");
        assert_eq!(info.date_range.as_deref(), Some("January - March 2024"));
    }

    #[test]
    fn load_requires_users_json() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("channels.json"), "[]").expect("write");
        let err = WorkspaceContext::load(tmp.path()).expect_err("missing users");
        assert!(err.to_string().contains("users.json"));
    }

    #[test]
    fn canvas_url_yields_workspace_url() {
        let tmp = tempdir().expect("tempdir");
        fs::write(
            tmp.path().join("canvases.json"),
            r#"[{"url": "https://app.slack.com/canvas/T0123"}]"#,
        )
        .expect("write");
        let ws = ctx(tmp.path(), &[]);
        assert_eq!(
            ws.export_info(None).workspace_url.as_deref(),
            Some("https://T0123.slack.com")
        );
    }
}
