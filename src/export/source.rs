use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::ViewerError;
use crate::export::warn::{self, WarnEvent};

/// Where the export's JSON lives. Zip exports are unpacked into a temporary
/// directory that is removed when the source is dropped.
#[derive(Debug)]
pub struct ExportSource {
    root: PathBuf,
    archive_stem: Option<String>,
    _extracted: Option<TempDir>,
}

impl ExportSource {
    pub fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            let root = find_data_root(path)?;
            return Ok(Self {
                root,
                archive_stem: None,
                _extracted: None,
            });
        }
        if !path.is_file() {
            return Err(ViewerError::ExportLayout(format!("export not found: {}", path.display())).into());
        }

        let extracted = tempfile::tempdir().context("failed to create temp extract dir")?;
        tracing::info!(archive = %path.display(), into = %extracted.path().display(), "extracting export");
        extract_zip(path, extracted.path())?;
        let root = find_data_root(extracted.path())?;
        let archive_stem = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .map(|n| n.strip_suffix(".zip").map(str::to_string).unwrap_or(n));
        Ok(Self {
            root,
            archive_stem,
            _extracted: Some(extracted),
        })
    }

    /// Directory holding `channels.json`, `users.json` and one directory per
    /// channel.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name of the archive without `.zip`, when the export was zipped.
    pub fn archive_stem(&self) -> Option<&str> {
        self.archive_stem.as_deref()
    }
}

fn extract_zip(zip_path: &Path, target: &Path) -> Result<()> {
    let file = File::open(zip_path).with_context(|| format!("failed to open {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("failed to read zip archive")?;

    for idx in 0..archive.len() {
        let mut entry = archive.by_index(idx).context("failed to read zip entry")?;
        let Some(relative) = entry.enclosed_name() else {
            warn::emit(WarnEvent {
                code: "UNSAFE_ZIP_ENTRY",
                stage: "extract",
                channel: "-",
                subject: entry.name(),
                reason: "entry escapes the extraction directory",
            });
            continue;
        };
        let out_path = target.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).with_context(|| format!("failed to create {}", out_path.display()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out = File::create(&out_path).with_context(|| format!("failed to create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out).with_context(|| format!("failed to extract {}", out_path.display()))?;
    }
    Ok(())
}

/// Shallowest directory containing `channels.json`, searched breadth-first
/// in name order.
fn find_data_root(base: &Path) -> Result<PathBuf> {
    let mut queue = VecDeque::from([base.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        if dir.join("channels.json").is_file() {
            return Ok(dir);
        }
        let mut children: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("failed to read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        children.sort();
        queue.extend(children);
    }
    Err(ViewerError::ExportLayout(format!("no channels.json under {}", base.display())).into())
}
