use std::collections::{BTreeMap, HashMap};

use crate::error::ChannelError;
use crate::export::model::{SENTINEL_TIMESTAMP, Timestamp};
use crate::export::resolver::ResolvedMessage;
use crate::export::warn::{self, WarnEvent};

/// All messages sharing one `thread_ts`, parent included, in timeline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub key: String,
    members: Vec<usize>,
    pub reply_count: usize,
}

impl Thread {
    /// Only threads with at least one real reply get reply UI.
    pub fn is_expandable(&self) -> bool {
        self.reply_count > 0
    }
}

/// A channel's messages in timeline order plus the thread map over them.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<ResolvedMessage>,
    top_level: Vec<usize>,
    threads: BTreeMap<String, Thread>,
}

impl Transcript {
    /// Every message, sorted by timestamp.
    pub fn messages(&self) -> &[ResolvedMessage] {
        &self.messages
    }

    pub fn top_level(&self) -> impl Iterator<Item = &ResolvedMessage> {
        self.top_level.iter().map(|&idx| &self.messages[idx])
    }

    pub fn thread(&self, key: &str) -> Option<&Thread> {
        self.threads.get(key)
    }

    /// Thread members other than the parent, in timeline order.
    pub fn replies(&self, key: &str) -> Vec<&ResolvedMessage> {
        let Some(thread) = self.thread(key) else {
            return Vec::new();
        };
        thread
            .members
            .iter()
            .map(|&idx| &self.messages[idx])
            .filter(|m| m.message.timestamp_or_sentinel() != thread.key)
            .collect()
    }

    /// Replies to show under `message`, empty unless it parents a real thread.
    pub fn replies_of(&self, message: &ResolvedMessage) -> Vec<&ResolvedMessage> {
        if !message.has_replies {
            return Vec::new();
        }
        self.replies(message.message.timestamp_or_sentinel())
    }

    pub fn expandable_thread_count(&self) -> usize {
        self.threads.values().filter(|t| t.is_expandable()).count()
    }
}

/// Orders a channel's messages and groups replies under their parents.
///
/// Messages without a `ts` get the sentinel `"0"` and sort first. Any `ts`
/// that does not parse as a number stops the channel, since the timeline
/// order could not be trusted.
pub fn reconstruct(channel: &str, messages: Vec<ResolvedMessage>) -> Result<Transcript, ChannelError> {
    let mut keyed = Vec::with_capacity(messages.len());
    for mut resolved in messages {
        if resolved.message.timestamp.is_none() {
            warn::emit(WarnEvent {
                code: "MISSING_TIMESTAMP",
                stage: "threads",
                channel,
                subject: resolved.message.author_id.as_deref().unwrap_or("unknown"),
                reason: "message has no ts; sorted first",
            });
            resolved.message.timestamp = Some(SENTINEL_TIMESTAMP.to_string());
        }
        let raw = resolved.message.timestamp_or_sentinel();
        let ts = Timestamp::parse(raw).ok_or_else(|| ChannelError::InvalidTimestamp(raw.to_string()))?;
        resolved.has_replies = false;
        resolved.reply_count = 0;
        keyed.push((ts, resolved));
    }

    keyed.sort_by_key(|(ts, _)| *ts);
    let mut messages: Vec<ResolvedMessage> = keyed.into_iter().map(|(_, m)| m).collect();

    let mut threads: BTreeMap<String, Thread> = BTreeMap::new();
    for (idx, resolved) in messages.iter().enumerate() {
        let Some(key) = resolved.message.thread_parent_timestamp.as_deref() else {
            continue;
        };
        let thread = threads.entry(key.to_string()).or_insert_with(|| Thread {
            key: key.to_string(),
            members: Vec::new(),
            reply_count: 0,
        });
        thread.members.push(idx);
        if resolved.message.timestamp_or_sentinel() != key {
            thread.reply_count += 1;
        }
    }

    let mut parent_of: HashMap<&str, usize> = HashMap::new();
    for (idx, resolved) in messages.iter().enumerate() {
        parent_of.entry(resolved.message.timestamp_or_sentinel()).or_insert(idx);
    }
    let mut parents = Vec::new();
    for thread in threads.values().filter(|t| t.is_expandable()) {
        match parent_of.get(thread.key.as_str()) {
            Some(&idx) => parents.push((idx, thread.reply_count)),
            None => warn::emit(WarnEvent {
                code: "ORPHAN_REPLIES",
                stage: "threads",
                channel,
                subject: &thread.key,
                reason: &format!("{} replies without a parent message", thread.reply_count),
            }),
        }
    }
    drop(parent_of);
    for (idx, reply_count) in parents {
        messages[idx].has_replies = true;
        messages[idx].reply_count = reply_count;
    }

    let top_level = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.message.is_reply())
        .map(|(idx, _)| idx)
        .collect();

    Ok(Transcript {
        messages,
        top_level,
        threads,
    })
}
