use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Stand-in for messages exported without a `ts`; sorts before everything.
pub const SENTINEL_TIMESTAMP: &str = "0";

/// Numeric view of an export timestamp such as `1700000000.000200`.
///
/// Parsed as fixed point (whole seconds plus up to nine fractional digits)
/// so that adjacent microsecond timestamps never collapse the way they can
/// through `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    secs: u64,
    nanos: u32,
}

impl Timestamp {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let secs = if whole.is_empty() {
            0
        } else {
            whole.parse::<u64>().ok()?
        };
        let mut digits: String = frac.chars().take(9).collect();
        while digits.len() < 9 {
            digits.push('0');
        }
        let nanos = digits.parse::<u32>().ok()?;
        Some(Self { secs, nanos })
    }

    pub fn to_local(self) -> Option<DateTime<Local>> {
        let secs = i64::try_from(self.secs).ok()?;
        Local.timestamp_opt(secs, self.nanos).single()
    }
}

/// Local wall-clock rendering used by pages and reports.
pub fn format_local(raw: &str, pattern: &str) -> Option<String> {
    let ts = Timestamp::parse(raw)?;
    Some(ts.to_local()?.format(pattern).to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FileMode {
    #[default]
    Normal,
    Tombstone,
    HiddenByLimit,
    Other(String),
}

impl FileMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Normal => "normal",
            Self::Tombstone => "tombstone",
            Self::HiddenByLimit => "hidden_by_limit",
            Self::Other(raw) => raw,
        }
    }

    /// Modes for which the export keeps no downloadable copy.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Tombstone | Self::HiddenByLimit)
    }
}

impl From<Option<String>> for FileMode {
    fn from(raw: Option<String>) -> Self {
        match raw.as_deref().map(str::trim) {
            None | Some("") | Some("hosted") => Self::Normal,
            Some("tombstone") => Self::Tombstone,
            Some("hidden_by_limit") => Self::HiddenByLimit,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from(Option::<String>::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileReference {
    #[serde(default, deserialize_with = "non_empty_string")]
    pub id: Option<String>,
    #[serde(default, rename = "url_private", deserialize_with = "non_empty_string")]
    pub remote_url: Option<String>,
    #[serde(default, rename = "name", deserialize_with = "non_empty_string")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mode: FileMode,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AttachmentBlock {
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<FileReference>,
}

/// One export record, as loaded from a day file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Message {
    #[serde(default, rename = "ts", deserialize_with = "stringish")]
    pub timestamp: Option<String>,
    #[serde(default, rename = "user", deserialize_with = "non_empty_string")]
    pub author_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, rename = "thread_ts", deserialize_with = "stringish")]
    pub thread_parent_timestamp: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<FileReference>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<AttachmentBlock>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocks: Vec<Value>,
}

impl Message {
    pub fn timestamp_or_sentinel(&self) -> &str {
        self.timestamp.as_deref().unwrap_or(SENTINEL_TIMESTAMP)
    }

    /// Direct files first, then files nested in attachment blocks.
    pub fn file_references(&self) -> impl Iterator<Item = &FileReference> {
        self.files
            .iter()
            .chain(self.attachments.iter().flat_map(|block| block.files.iter()))
    }

    pub fn is_reply(&self) -> bool {
        self.thread_parent_timestamp
            .as_deref()
            .is_some_and(|key| key != self.timestamp_or_sentinel())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.trim().is_empty()))
}

/// Timestamps are strings in real exports; numbers show up in hand-edited ones.
fn stringish<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number timestamp, got {other}"
        ))),
    }
}
