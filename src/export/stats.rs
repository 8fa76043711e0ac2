use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::export::pipeline::LoadedChannel;
use crate::export::workspace::WorkspaceContext;

/// `January 2024`, `January - March 2024` or `December 2023 - February 2024`.
pub fn format_month_range(first: NaiveDate, last: NaiveDate) -> String {
    if first.year() == last.year() {
        if first.month() == last.month() {
            first.format("%B %Y").to_string()
        } else {
            format!("{} - {}", first.format("%B"), last.format("%B %Y"))
        }
    } else {
        format!("{} - {}", first.format("%B %Y"), last.format("%B %Y"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStat {
    pub name: String,
    pub messages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub name: String,
    pub messages: usize,
    pub files: usize,
    pub threads: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    /// `YYYY-MM` -> messages in that month's day files.
    pub monthly: BTreeMap<String, usize>,
    pub users: Vec<UserStat>,
}

impl ChannelStats {
    pub fn collect(name: &str, loaded: &LoadedChannel, workspace: &WorkspaceContext) -> Self {
        let mut files = 0;
        let mut thread_keys = BTreeSet::new();
        let mut per_user: HashMap<&str, usize> = HashMap::new();
        let mut monthly = BTreeMap::new();

        for day in &loaded.days {
            *monthly.entry(day.file.date.format("%Y-%m").to_string()).or_insert(0) += day.messages.len();
            for message in &day.messages {
                files += message.files.len();
                if let Some(key) = message.thread_parent_timestamp.as_deref() {
                    thread_keys.insert(key);
                }
                if let Some(author) = message.author_id.as_deref() {
                    *per_user.entry(author).or_insert(0) += 1;
                }
            }
        }

        let mut users: Vec<UserStat> = per_user
            .into_iter()
            .map(|(id, messages)| UserStat {
                name: workspace.username(id).to_string(),
                messages,
            })
            .collect();
        users.sort_by(|a, b| b.messages.cmp(&a.messages).then_with(|| a.name.cmp(&b.name)));

        Self {
            name: name.to_string(),
            messages: loaded.message_count(),
            files,
            threads: thread_keys.len(),
            first_day: loaded.days.first().map(|d| d.file.date),
            last_day: loaded.days.last().map(|d| d.file.date),
            monthly,
            users,
        }
    }

    pub fn date_range(&self) -> Option<String> {
        Some(format_month_range(self.first_day?, self.last_day?))
    }

    /// Latest `YYYY-MM` with any day file.
    pub fn most_recent_month(&self) -> Option<&str> {
        self.monthly.keys().next_back().map(String::as_str)
    }

    pub fn first_month(&self) -> Option<&str> {
        self.monthly.keys().next().map(String::as_str)
    }

    /// `Ada (12), Bob (3), +2 more`
    pub fn user_summary(&self, limit: usize) -> String {
        if self.users.is_empty() {
            return "No messages".to_string();
        }
        let mut parts: Vec<String> = self
            .users
            .iter()
            .take(limit)
            .map(|u| format!("{} ({})", u.name, u.messages))
            .collect();
        if self.users.len() > limit {
            parts.push(format!("+{} more", self.users.len() - limit));
        }
        parts.join(", ")
    }
}
