use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::ops::Bound;
use std::path::{Path, PathBuf};

/// Sorted listing of a channel's `files/` directory, keyed by file name.
///
/// Lookups go by identity prefix so the original file name and extension
/// may vary behind the identity. Names are kept sorted which makes the
/// first match identical on every platform.
#[derive(Debug, Clone, Default)]
pub struct CacheIndex {
    entries: BTreeMap<String, PathBuf>,
}

impl CacheIndex {
    /// A missing directory yields an empty index.
    pub fn scan(dir: &Path) -> io::Result<Self> {
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err),
        };

        let mut entries = BTreeMap::new();
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            // in-flight downloads
            if name.starts_with('.') {
                continue;
            }
            if entry.metadata()?.len() == 0 {
                continue;
            }
            entries.insert(name, path);
        }
        Ok(Self { entries })
    }

    pub fn find(&self, identity: &str) -> Option<&Path> {
        if identity.is_empty() {
            return None;
        }
        self.entries
            .range::<str, _>((Bound::Included(identity), Bound::Unbounded))
            .take_while(|(name, _)| name.starts_with(identity))
            .find(|(name, _)| names_identity(name, identity))
            .map(|(_, path)| path.as_path())
    }

    pub fn record(&mut self, path: PathBuf) {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.entries.insert(name.to_string(), path.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The identity must be followed by the `-name` or `.ext` suffix the
/// resolver writes, so `F1` never claims `F12-report.pdf`.
fn names_identity(name: &str, identity: &str) -> bool {
    name.strip_prefix(identity)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('-') || rest.starts_with('.'))
}
