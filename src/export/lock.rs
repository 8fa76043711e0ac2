use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::ViewerError;

pub const LOCK_FILE_NAME: &str = ".slack-export-viewer.lock";

/// Exclusive hold on an output directory for the duration of a run.
#[derive(Debug)]
pub struct OutputLock {
    file: File,
}

impl OutputLock {
    pub fn acquire(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;
        let path = output_dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            return Err(ViewerError::OutputLocked(output_dir.to_path_buf()).into());
        }

        file.set_len(0)
            .with_context(|| format!("failed to truncate {}", path.display()))?;
        writeln!(file, "pid={}", std::process::id())
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), "acquired output lock");
        Ok(Self { file })
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_until_release() {
        let tmp = tempdir().expect("tempdir");
        let out = tmp.path().join("out");

        let first = OutputLock::acquire(&out).expect("first");
        assert!(out.join(LOCK_FILE_NAME).exists());
        let err = OutputLock::acquire(&out).expect_err("locked");
        assert!(matches!(
            err.downcast_ref::<ViewerError>(),
            Some(ViewerError::OutputLocked(_))
        ));

        drop(first);
        OutputLock::acquire(&out).expect("after release");
    }
}
