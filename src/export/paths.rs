use std::path::{Path, PathBuf};

/// Where a conversion writes things.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn index_html(&self) -> PathBuf {
        self.root.join("index.html")
    }

    pub fn ledger(&self) -> PathBuf {
        self.root.join("ledger.jsonl")
    }

    pub fn channel_dir(&self, channel: &str) -> PathBuf {
        self.root.join(channel)
    }

    pub fn channel_html(&self, channel: &str) -> PathBuf {
        self.channel_dir(channel).join("index.html")
    }

    pub fn channel_text(&self, channel: &str) -> PathBuf {
        self.channel_dir(channel).join("index.txt")
    }

    pub fn missing_report(&self, channel: &str) -> PathBuf {
        self.channel_dir(channel).join("files_missing.csv")
    }

    pub fn downloaded_report(&self, channel: &str) -> PathBuf {
        self.channel_dir(channel).join("files_downloaded.csv")
    }

    pub fn summary(&self, channel: &str) -> PathBuf {
        self.channel_dir(channel).join("summary.txt")
    }

    /// Channel directories left by earlier runs, sorted by name.
    pub fn existing_channels(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut out: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        out.sort();
        out
    }
}

impl AsRef<Path> for OutputLayout {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn channel_paths_hang_off_the_root() {
        let layout = OutputLayout::new("/out");
        assert_eq!(layout.channel_html("general"), PathBuf::from("/out/general/index.html"));
        assert_eq!(layout.missing_report("general"), PathBuf::from("/out/general/files_missing.csv"));
        assert_eq!(layout.ledger(), PathBuf::from("/out/ledger.jsonl"));
    }

    #[test]
    fn existing_channels_skips_files_and_hidden_dirs() {
        let tmp = tempdir().expect("tempdir");
        for dir in ["random", "general", ".cache"] {
            std::fs::create_dir_all(tmp.path().join(dir)).expect("mkdir");
        }
        std::fs::write(tmp.path().join("index.html"), "").expect("write");
        let layout = OutputLayout::new(tmp.path());
        assert_eq!(layout.existing_channels(), vec!["general", "random"]);
        assert!(OutputLayout::new(tmp.path().join("nope")).existing_channels().is_empty());
    }
}
