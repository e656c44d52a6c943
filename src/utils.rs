//! Utility functions for media file naming, atomic writes and timestamp formatting

use crate::types::{ChannelRef, MediaKind, MessageId};
use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Format of the `Date` output column
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Suffix of partially written media files
const PARTIAL_SUFFIX: &str = "part";

// Static pattern; compilation cannot fail.
#[allow(clippy::unwrap_used)]
fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap())
}

/// Deterministic file name for a message's attachment
///
/// The name is `<handle>_<message id>.<ext>`. Handles are reduced to `[A-Za-z0-9_-]`;
/// when that changes the handle, 8 hex digits of its SHA-256 are appended so two
/// distinct references never map to the same file.
///
/// # Examples
///
/// ```
/// use channel_dl::types::{ChannelRef, MediaKind, MessageId};
/// use channel_dl::utils::media_filename;
///
/// let name = media_filename(&ChannelRef::parse("@DoctorsET"), MessageId(42), MediaKind::Photo);
/// assert_eq!(name, "DoctorsET_42.jpg");
/// ```
pub fn media_filename(reference: &ChannelRef, message_id: MessageId, kind: MediaKind) -> String {
    let handle = reference.handle();
    let sanitized = unsafe_chars().replace_all(handle, "_");
    let stem = if !handle.is_empty() && sanitized == handle {
        handle.to_string()
    } else {
        let digest = Sha256::digest(handle.as_bytes());
        let suffix: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
        let base = sanitized.trim_matches('_');
        if base.is_empty() {
            format!("channel_{}", suffix)
        } else {
            format!("{}_{}", base, suffix)
        }
    };
    format!("{}_{}.{}", stem, message_id, kind.extension())
}

/// Path of the temporary file used while `path` is being written
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

/// Write `bytes` to `path` so readers never observe a partial file
///
/// Data goes to a sibling `.part` file which is synced and then renamed over `path`.
/// An existing file at `path` is replaced. On error the partial file is removed.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let tmp = partial_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

/// Render a timestamp for the `Date` column, e.g. `2024-05-01 10:00:00+00:00`
pub fn format_timestamp(date: &DateTime<Utc>) -> String {
    date.format(TIMESTAMP_FORMAT).to_string()
}
