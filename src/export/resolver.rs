use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::export::cache_index::CacheIndex;
use crate::export::fetch::{FetchOutcome, Fetcher, url_extension};
use crate::export::identity;
use crate::export::model::{FileMode, FileReference, Message};
use crate::export::util::parallel_map;
use crate::export::warn::{self, WarnEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum Outcome {
    Exists,
    /// Fetched now, or kept as a remote link when the host is not trusted.
    Downloaded,
    UrlMissing,
    DownloadFailed,
    /// Raw export mode (`tombstone`, `hidden_by_limit`, `external`, ...).
    Mode(String),
}

impl Outcome {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exists => "exists",
            Self::Downloaded => "downloaded",
            Self::UrlMissing => "url_missing",
            Self::DownloadFailed => "download_failed",
            Self::Mode(mode) => mode,
        }
    }
}

impl From<Outcome> for String {
    fn from(outcome: Outcome) -> Self {
        outcome.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEvent {
    pub timestamp: String,
    pub identity: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Path relative to the channel directory, e.g. `files/F1-a.png`.
    Local { path: String },
    Linked { url: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub file: FileReference,
    pub identity: String,
    pub resolution: Resolution,
}

impl ResolvedAttachment {
    /// Where the rendered page should point; `None` exactly when the
    /// attachment failed.
    pub fn local_path(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Local { path } => Some(path),
            Resolution::Linked { url } => Some(url),
            Resolution::Failed { .. } => None,
        }
    }

    pub fn download_failed(&self) -> bool {
        matches!(self.resolution, Resolution::Failed { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.file.display_name.as_deref().unwrap_or(&self.identity)
    }
}

/// A loaded message plus the resolution of every file it references.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMessage {
    pub message: Message,
    pub attachments: Vec<ResolvedAttachment>,
    pub has_replies: bool,
    pub reply_count: usize,
}

impl ResolvedMessage {
    #[cfg(test)]
    pub fn unresolved(message: Message) -> Self {
        Self {
            message,
            attachments: Vec::new(),
            has_replies: false,
            reply_count: 0,
        }
    }
}

/// Fetch result remembered for the rest of the run so an identity is never
/// attempted twice, even when the first attempt failed.
#[derive(Debug, Clone)]
enum PriorAttempt {
    Linked(String),
    Failed(String),
}

/// Per-channel bookkeeping for one conversion run.
#[derive(Debug)]
pub struct ChannelRunState {
    channel: String,
    files_dir: PathBuf,
    cache: CacheIndex,
    attempts: HashMap<String, PriorAttempt>,
    missing: Vec<FileEvent>,
    downloaded: Vec<FileEvent>,
    fetch_attempts: usize,
}

impl ChannelRunState {
    /// Rebuilds the identity cache from whatever earlier runs left in
    /// `<channel_dir>/files`.
    pub fn open(channel: &str, channel_dir: &Path) -> io::Result<Self> {
        let files_dir = channel_dir.join("files");
        let cache = CacheIndex::scan(&files_dir)?;
        Ok(Self {
            channel: channel.to_string(),
            files_dir,
            cache,
            attempts: HashMap::new(),
            missing: Vec::new(),
            downloaded: Vec::new(),
            fetch_attempts: 0,
        })
    }

    pub fn missing(&self) -> &[FileEvent] {
        &self.missing
    }

    pub fn downloaded(&self) -> &[FileEvent] {
        &self.downloaded
    }

    pub fn fetch_attempts(&self) -> usize {
        self.fetch_attempts
    }

    pub fn cached_files(&self) -> usize {
        self.cache.len()
    }

    fn push_downloaded(&mut self, timestamp: &str, identity: &str, outcome: Outcome) {
        self.downloaded.push(FileEvent {
            timestamp: timestamp.to_string(),
            identity: identity.to_string(),
            outcome,
        });
    }

    fn push_missing(&mut self, timestamp: &str, identity: &str, outcome: Outcome) {
        self.missing.push(FileEvent {
            timestamp: timestamp.to_string(),
            identity: identity.to_string(),
            outcome,
        });
    }
}

/// Turns file references into local paths or recorded failures for one
/// channel.
pub struct AttachmentResolver<'a> {
    fetcher: &'a dyn Fetcher,
    state: Mutex<ChannelRunState>,
    workers: usize,
}

impl<'a> AttachmentResolver<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, state: ChannelRunState, workers: usize) -> Self {
        Self {
            fetcher,
            state: Mutex::new(state),
            workers: workers.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelRunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_state(self) -> ChannelRunState {
        self.state.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve one reference found on the message stamped `timestamp`.
    pub fn resolve_file(&self, file: &FileReference, timestamp: &str) -> ResolvedAttachment {
        let identity = identity::resolve(file);
        let resolution = self.resolve_identity(file, &identity, timestamp);
        ResolvedAttachment {
            file: file.clone(),
            identity,
            resolution,
        }
    }

    fn resolve_identity(&self, file: &FileReference, identity: &str, timestamp: &str) -> Resolution {
        let stem = file_stem(identity);

        let cached = self.state().cache.find(&stem).map(Path::to_path_buf);
        if let Some(path) = cached {
            tracing::debug!(identity, path = %path.display(), "found existing file");
            self.state().push_downloaded(timestamp, identity, Outcome::Exists);
            return Resolution::Local {
                path: channel_relative(&path),
            };
        }

        let url = file.remote_url.as_deref().unwrap_or_default();
        if url.is_empty() || file.mode.is_unavailable() {
            let (outcome, reason) = match &file.mode {
                FileMode::Normal => (Outcome::UrlMissing, "File URL missing".to_string()),
                mode => {
                    let mode = mode.as_str().to_string();
                    let reason = format!("File {mode}");
                    (Outcome::Mode(mode), reason)
                }
            };
            self.state().push_missing(timestamp, identity, outcome);
            return Resolution::Failed { reason };
        }

        let prior = self.state().attempts.get(identity).cloned();
        match prior {
            Some(PriorAttempt::Linked(url)) => {
                self.state().push_downloaded(timestamp, identity, Outcome::Downloaded);
                return Resolution::Linked { url };
            }
            Some(PriorAttempt::Failed(reason)) => {
                self.state().push_missing(timestamp, identity, Outcome::DownloadFailed);
                return Resolution::Failed { reason };
            }
            None => {}
        }

        let destination = self.state().files_dir.join(destination_name(&stem, file));
        let outcome = self.fetcher.fetch(url, &destination);

        let mut state = self.state();
        state.fetch_attempts += 1;
        match outcome {
            FetchOutcome::Downloaded { bytes } => {
                tracing::debug!(identity, bytes, "downloaded file");
                state.cache.record(destination.clone());
                state.push_downloaded(timestamp, identity, Outcome::Downloaded);
                Resolution::Local {
                    path: channel_relative(&destination),
                }
            }
            FetchOutcome::PassThrough => {
                state
                    .attempts
                    .insert(identity.to_string(), PriorAttempt::Linked(url.to_string()));
                state.push_downloaded(timestamp, identity, Outcome::Downloaded);
                Resolution::Linked {
                    url: url.to_string(),
                }
            }
            FetchOutcome::Failed(failure) => {
                let reason = format!("Download failed ({failure})");
                warn::emit(WarnEvent {
                    code: "DOWNLOAD_FAILED",
                    stage: "attachments",
                    channel: &state.channel,
                    subject: identity,
                    reason: &format!("{} {url}", file.display_name.as_deref().unwrap_or(identity)),
                });
                tracing::error!(identity, url, %failure, "download failed");
                state
                    .attempts
                    .insert(identity.to_string(), PriorAttempt::Failed(reason.clone()));
                state.push_missing(timestamp, identity, Outcome::DownloadFailed);
                Resolution::Failed { reason }
            }
        }
    }

    /// Resolve every file of every message. Distinct identities run on the
    /// worker pool; each identity is owned by exactly one task, which walks
    /// its references in message order.
    pub fn resolve_messages(&self, messages: Vec<Message>) -> Vec<ResolvedMessage> {
        let mut group_of: BTreeMap<String, usize> = BTreeMap::new();
        let mut groups: Vec<Vec<(usize, usize)>> = Vec::new();
        for (mi, message) in messages.iter().enumerate() {
            for (fi, file) in message.file_references().enumerate() {
                let identity = identity::resolve(file);
                let gi = *group_of.entry(identity).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[gi].push((mi, fi));
            }
        }

        let resolved_groups = parallel_map(groups, self.workers, |refs| {
            refs.into_iter()
                .filter_map(|(mi, fi)| {
                    let message = &messages[mi];
                    let file = message.file_references().nth(fi)?;
                    Some((mi, fi, self.resolve_file(file, message.timestamp_or_sentinel())))
                })
                .collect::<Vec<_>>()
        });

        let mut slots: Vec<Vec<Option<ResolvedAttachment>>> = messages
            .iter()
            .map(|m| vec![None; m.file_references().count()])
            .collect();
        for (mi, fi, attachment) in resolved_groups.into_iter().flatten() {
            slots[mi][fi] = Some(attachment);
        }

        messages
            .into_iter()
            .zip(slots)
            .map(|(message, attachments)| ResolvedMessage {
                message,
                attachments: attachments.into_iter().flatten().collect(),
                has_replies: false,
                reply_count: 0,
            })
            .collect()
    }
}

/// File-system safe form of a name component.
fn safe_component(raw: &str) -> String {
    raw.chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '\0' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect()
}

/// Identity as a file name prefix. Bytes other than ASCII alphanumerics and
/// `_` become `%XX`, so distinct identities never share a stem and a stem
/// never contains the `-` / `.` that end it in the cache lookup.
fn file_stem(identity: &str) -> String {
    let mut out = String::with_capacity(identity.len());
    for byte in identity.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// `{identity}-{name}` keeps the readable name behind the lookup prefix;
/// nameless files fall back to the URL's extension.
pub fn destination_name(stem: &str, file: &FileReference) -> String {
    match file.display_name.as_deref() {
        Some(name) => format!("{stem}-{}", safe_component(name)),
        None => {
            let ext = file
                .remote_url
                .as_deref()
                .and_then(url_extension)
                .unwrap_or_else(|| ".unknown".to_string());
            format!("{stem}{ext}")
        }
    }
}

fn channel_relative(path: &Path) -> String {
    match path.file_name() {
        Some(name) => format!("files/{}", name.to_string_lossy()),
        None => path.display().to_string(),
    }
}
