use md5::{Digest, Md5};

use crate::export::model::FileReference;

/// Stable key for an attachment: the export's file id when present,
/// otherwise the hex MD5 of its remote URL.
///
/// The URL digest is what keeps re-runs from downloading the same file under
/// a new name. A reference with neither id nor URL hashes the empty string
/// and always lands on the same identity.
pub fn resolve(file: &FileReference) -> String {
    if let Some(id) = file.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    url_digest(file.remote_url.as_deref().unwrap_or_default())
}

fn url_digest(url: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}
