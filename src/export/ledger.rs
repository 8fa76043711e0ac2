use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::export::pipeline::DayFile;

/// One converted channel, appended to `ledger.jsonl` after every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub channel: String,
    pub fingerprint: String,
    pub messages: usize,
    pub threads: usize,
    pub downloaded: usize,
    pub missing: usize,
    pub converted_at_epoch_secs: u64,
}

/// sha256 over every day file's name and bytes, in date order. Changes when
/// a day is added, removed or edited.
pub fn fingerprint(day_files: &[DayFile]) -> Result<String> {
    let mut hasher = Sha256::new();
    for day in day_files {
        let bytes = fs::read(&day.path).with_context(|| format!("failed to read {}", day.path.display()))?;
        hasher.update(day.date.to_string().as_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn read_ledger(path: &Path) -> Result<Vec<RunRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut out = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: RunRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("failed to parse ledger line in {}", path.display()))?;
        out.push(entry);
    }
    Ok(out)
}

pub fn append_record(path: &Path, record: &RunRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let line = format!("{}\n", serde_json::to_string(record)?);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Most recent record for `channel`.
pub fn last_for<'a>(records: &'a [RunRecord], channel: &str) -> Option<&'a RunRecord> {
    records.iter().rev().find(|r| r.channel == channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn record(channel: &str, fingerprint: &str, at: u64) -> RunRecord {
        RunRecord {
            channel: channel.to_string(),
            fingerprint: fingerprint.to_string(),
            messages: 3,
            threads: 1,
            downloaded: 2,
            missing: 0,
            converted_at_epoch_secs: at,
        }
    }

    #[test]
    fn append_then_read_keeps_order() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("ledger.jsonl");
        assert!(read_ledger(&path).expect("empty").is_empty());

        append_record(&path, &record("general", "aa", 1)).expect("append");
        append_record(&path, &record("random", "bb", 2)).expect("append");
        append_record(&path, &record("general", "cc", 3)).expect("append");

        let records = read_ledger(&path).expect("read");
        assert_eq!(records.len(), 3);
        assert_eq!(last_for(&records, "general").map(|r| r.fingerprint.as_str()), Some("cc"));
        assert_eq!(last_for(&records, "missing"), None);
    }

    #[test]
    fn fingerprint_tracks_day_file_content() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("2024-01-01.json");
        fs::write(&path, "[]").expect("write");
        let days = vec![DayFile {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
            path: path.clone(),
        }];

        let before = fingerprint(&days).expect("hash");
        assert_eq!(before, fingerprint(&days).expect("hash"));
        assert_eq!(before.len(), 64);

        fs::write(&path, r#"[{"ts": "1"}]"#).expect("write");
        assert_ne!(before, fingerprint(&days).expect("hash"));
    }
}
