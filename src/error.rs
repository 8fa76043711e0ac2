use std::path::PathBuf;

use thiserror::Error;

/// Failures that stop processing of a single channel. Other channels in the
/// same run keep going.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel directory not found: {}", .0.display())]
    MissingChannelDir(PathBuf),
    #[error("failed to read day file {}: {source}", path.display())]
    UnreadableDayFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed day file {}: {source}", path.display())]
    MalformedDayFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unparsable message timestamp `{0}`")]
    InvalidTimestamp(String),
    #[error("failed to scan cached files in {}: {source}", path.display())]
    FilesDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write channel output {}: {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ChannelError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingChannelDir(_) => "E001_CHANNEL_DIR_MISSING",
            Self::UnreadableDayFile { .. } => "E002_DAY_FILE_UNREADABLE",
            Self::MalformedDayFile { .. } => "E003_DAY_FILE_MALFORMED",
            Self::InvalidTimestamp(_) => "E004_TIMESTAMP_INVALID",
            Self::FilesDirUnreadable { .. } => "E005_FILES_DIR_UNREADABLE",
            Self::OutputWrite { .. } => "E006_OUTPUT_WRITE",
        }
    }
}

/// Outcome of a single failed fetch attempt. Never crosses the attachment
/// resolver; it ends up as the `failure_reason` of the attachment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error("timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("empty response body")]
    EmptyBody,
    #[error("local write failed: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("output directory is locked by another run: {}", .0.display())]
    OutputLocked(PathBuf),
    #[error("channel not found in export: {0}")]
    UnknownChannel(String),
    #[error("export layout invalid: {0}")]
    ExportLayout(String),
    #[error("config invalid: {0}")]
    InvalidConfig(String),
}
