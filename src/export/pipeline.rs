use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ChannelError;
use crate::export::fetch::Fetcher;
use crate::export::model::Message;
use crate::export::resolver::{AttachmentResolver, ChannelRunState};
use crate::export::threads::{self, Transcript};
use crate::export::warn::{self, WarnEvent};

pub const DAY_FILE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayFile {
    pub date: NaiveDate,
    pub path: PathBuf,
}

/// Day files of one channel, oldest first. Stray `.json` files (anything not
/// named `YYYY-MM-DD.json`) are skipped with a warning.
pub fn list_day_files(channel: &str, channel_dir: &Path) -> Result<Vec<DayFile>, ChannelError> {
    if !channel_dir.is_dir() {
        return Err(ChannelError::MissingChannelDir(channel_dir.to_path_buf()));
    }
    let entries = fs::read_dir(channel_dir).map_err(|source| ChannelError::UnreadableDayFile {
        path: channel_dir.to_path_buf(),
        source,
    })?;

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ChannelError::UnreadableDayFile {
            path: channel_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match parse_day(&stem) {
            Some(date) => out.push(DayFile { date, path }),
            None => warn::emit(WarnEvent {
                code: "SKIPPED_FILE",
                stage: "load",
                channel,
                subject: &stem,
                reason: "json file name is not a YYYY-MM-DD date",
            }),
        }
    }
    out.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(out)
}

fn parse_day(stem: &str) -> Option<NaiveDate> {
    if stem.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(stem, DAY_FILE_FORMAT).ok()
}

/// One day's messages, in file order.
pub fn load_day_file(channel_dir: &Path, date: NaiveDate) -> Result<Vec<Message>, ChannelError> {
    let path = channel_dir.join(format!("{}.json", date.format(DAY_FILE_FORMAT)));
    read_messages(&path)
}

fn read_messages(path: &Path) -> Result<Vec<Message>, ChannelError> {
    let raw = fs::read_to_string(path).map_err(|source| ChannelError::UnreadableDayFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ChannelError::MalformedDayFile {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedDay {
    pub file: DayFile,
    pub messages: Vec<Message>,
}

/// Raw messages of a whole channel, day by day.
#[derive(Debug, Clone, Default)]
pub struct LoadedChannel {
    pub days: Vec<LoadedDay>,
}

impl LoadedChannel {
    pub fn day_files(&self) -> Vec<DayFile> {
        self.days.iter().map(|d| d.file.clone()).collect()
    }

    pub fn message_count(&self) -> usize {
        self.days.iter().map(|d| d.messages.len()).sum()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.days.into_iter().flat_map(|d| d.messages).collect()
    }
}

pub fn load_channel(channel: &str, channel_dir: &Path) -> Result<LoadedChannel, ChannelError> {
    let mut days = Vec::new();
    for file in list_day_files(channel, channel_dir)? {
        let messages = load_day_file(channel_dir, file.date)?;
        days.push(LoadedDay { file, messages });
    }
    let loaded = LoadedChannel { days };
    tracing::debug!(
        channel,
        days = loaded.days.len(),
        messages = loaded.message_count(),
        "loaded channel"
    );
    Ok(loaded)
}

/// Fully resolved channel handed to renderers and report writers.
#[derive(Debug)]
pub struct ResolvedChannel {
    pub day_files: Vec<DayFile>,
    pub transcript: Transcript,
    pub state: ChannelRunState,
}

/// Resolve every attachment of a loaded channel, then order and thread it.
///
/// `output_dir` is the channel's own output directory; its `files/`
/// subdirectory is both the cache and the download target.
pub fn process_channel(
    channel: &str,
    loaded: LoadedChannel,
    output_dir: &Path,
    fetcher: &dyn Fetcher,
    fetch_workers: usize,
) -> Result<ResolvedChannel, ChannelError> {
    let state = ChannelRunState::open(channel, output_dir).map_err(|source| {
        ChannelError::FilesDirUnreadable {
            path: output_dir.join("files"),
            source,
        }
    })?;
    tracing::debug!(channel, cached = state.cached_files(), "scanned cached files");

    let day_files = loaded.day_files();
    if loaded.message_count() == 0 {
        warn::emit(WarnEvent {
            code: "EMPTY_CHANNEL",
            stage: "load",
            channel,
            subject: channel,
            reason: "no messages in any day file",
        });
    }

    let resolver = AttachmentResolver::new(fetcher, state, fetch_workers);
    let resolved = resolver.resolve_messages(loaded.into_messages());
    let state = resolver.into_state();

    let transcript = threads::reconstruct(channel, resolved)?;
    tracing::info!(
        channel,
        messages = transcript.messages().len(),
        threads = transcript.expandable_thread_count(),
        fetches = state.fetch_attempts(),
        "channel resolved"
    );

    Ok(ResolvedChannel {
        day_files,
        transcript,
        state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fetch::FetchOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct WritingFetcher {
        calls: AtomicUsize,
    }

    impl Fetcher for WritingFetcher {
        fn fetch(&self, _url: &str, destination: &Path) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::create_dir_all(destination.parent().expect("parent")).expect("mkdir");
            fs::write(destination, b"img").expect("write");
            FetchOutcome::Downloaded { bytes: 3 }
        }
    }

    fn write_day(dir: &Path, name: &str, body: &str) {
        fs::create_dir_all(dir).expect("mkdir");
        fs::write(dir.join(name), body).expect("write day");
    }

    #[test]
    fn day_files_sorted_and_strays_skipped() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("general");
        write_day(&dir, "2024-02-01.json", "[]");
        write_day(&dir, "2023-12-31.json", "[]");
        write_day(&dir, "notes.json", "[]");
        write_day(&dir, "2024-01-01.txt", "x");

        let days = list_day_files("general", &dir).expect("list");
        let names: Vec<_> = days.iter().map(|d| d.date.to_string()).collect();
        assert_eq!(names, vec!["2023-12-31", "2024-02-01"]);
    }

    #[test]
    fn missing_channel_dir_is_channel_fatal() {
        let tmp = tempdir().expect("tempdir");
        let err = list_day_files("ghost", &tmp.path().join("ghost")).expect_err("missing");
        assert_eq!(err.code(), "E001_CHANNEL_DIR_MISSING");
    }

    #[test]
    fn malformed_day_file_is_reported_with_path() {
        let tmp = tempdir().expect("tempdir");
        write_day(tmp.path(), "2024-01-01.json", "{not json");
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        let err = load_day_file(tmp.path(), date).expect_err("malformed");
        assert_eq!(err.code(), "E003_DAY_FILE_MALFORMED");
        assert!(err.to_string().contains("2024-01-01.json"));
    }

    #[test]
    fn process_channel_resolves_then_threads() {
        let tmp = tempdir().expect("tempdir");
        let input = tmp.path().join("in/general");
        let output = tmp.path().join("out/general");
        write_day(
            &input,
            "2024-01-01.json",
            r#"[
                {"ts": "1704100000.000100", "user": "U1", "text": "parent",
                 "files": [{"id": "F1", "name": "a.png", "url_private": "https://files.slack.com/a.png"}]}
            ]"#,
        );
        write_day(
            &input,
            "2024-01-02.json",
            r#"[
                {"ts": "1704200000.000100", "user": "U2", "text": "reply",
                 "thread_ts": "1704100000.000100",
                 "files": [{"id": "F1", "name": "a.png", "url_private": "https://files.slack.com/a.png"}]},
                {"ts": "1704200001.000100", "user": "U1", "text": "gone",
                 "files": [{"id": "F2", "mode": "hidden_by_limit"}]}
            ]"#,
        );

        let fetcher = WritingFetcher {
            calls: AtomicUsize::new(0),
        };
        let loaded = load_channel("general", &input).expect("load");
        let channel = process_channel("general", loaded, &output, &fetcher, 2).expect("process");

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.day_files.len(), 2);
        assert_eq!(channel.transcript.top_level().count(), 2);
        let parent = channel.transcript.top_level().next().expect("parent");
        assert!(parent.has_replies);
        assert_eq!(parent.attachments[0].local_path(), Some("files/F1-a.png"));
        let reply = &channel.transcript.replies_of(parent)[0];
        assert_eq!(reply.attachments[0].local_path(), Some("files/F1-a.png"));

        assert_eq!(channel.state.downloaded().len(), 2);
        assert_eq!(channel.state.missing().len(), 1);
        assert_eq!(channel.state.missing()[0].outcome.as_str(), "hidden_by_limit");
        assert!(output.join("files/F1-a.png").exists());
    }

    #[test]
    fn bad_timestamp_aborts_the_channel() {
        let tmp = tempdir().expect("tempdir");
        let input = tmp.path().join("general");
        write_day(&input, "2024-01-01.json", r#"[{"ts": "soon", "text": "x"}]"#);
        let fetcher = WritingFetcher {
            calls: AtomicUsize::new(0),
        };
        let loaded = load_channel("general", &input).expect("load");
        let err = process_channel("general", loaded, &tmp.path().join("out"), &fetcher, 1)
            .expect_err("invalid ts");
        assert!(matches!(err, ChannelError::InvalidTimestamp(_)));
    }
}
