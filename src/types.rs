//! Core types for channel-dl

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Stable identifier the service assigns to a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message identifier, monotonic within a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A channel reference as configured by the operator
///
/// The original text is kept verbatim (it is what lands in the output's
/// `Channel Username` column); `handle` is the normalized form sent to the service.
/// Nothing is validated until resolution.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    original: String,
    handle: String,
}

// Static pattern; compilation cannot fail.
#[allow(clippy::unwrap_used)]
fn link_pattern() -> &'static Regex {
    static LINK: OnceLock<Regex> = OnceLock::new();
    LINK.get_or_init(|| {
        Regex::new(r"(?i)^(?:https?://)?(?:www\.)?(?:t\.me|telegram\.me)/(?:s/)?([^/?#]+)")
            .unwrap()
    })
}

impl ChannelRef {
    /// Normalize a configured reference.
    ///
    /// `@name`, `name`, `t.me/name` and `https://t.me/name` all share the handle `name`.
    pub fn parse(reference: &str) -> Self {
        let original = reference.trim().to_string();
        let handle = match link_pattern().captures(&original) {
            Some(caps) => caps[1].to_string(),
            None => original.trim_start_matches('@').to_string(),
        };
        Self { original, handle }
    }

    /// Reference exactly as configured
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Normalized handle (no `@`, no link prefix)
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Case-insensitive key used to detect duplicate references
    pub fn dedup_key(&self) -> String {
        self.handle.to_lowercase()
    }
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}

/// A channel after resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedChannel {
    /// Service-assigned id
    pub id: ChannelId,
    /// Display title
    pub title: String,
    /// The reference it was resolved from
    pub reference: ChannelRef,
}

/// Attachment kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image
    Photo,
    /// Video clip
    Video,
    /// Generic file
    Document,
    /// Sticker
    Sticker,
    /// Voice note or music
    Audio,
    /// Anything the service reports that we do not know
    #[serde(other)]
    Other,
}

impl MediaKind {
    /// File extension used when storing this kind
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
            MediaKind::Sticker => "webp",
            MediaKind::Audio => "ogg",
            MediaKind::Document | MediaKind::Other => "bin",
        }
    }
}

/// Service-internal handle to an attachment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Attachment kind
    pub kind: MediaKind,
    /// Opaque handle used to download the payload
    #[serde(rename = "ref")]
    pub id: String,
}

/// A message as produced by the service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Message id
    pub id: MessageId,
    /// Text body (may be empty)
    pub text: String,
    /// When the message was posted
    pub date: DateTime<Utc>,
    /// Attachment, if any
    pub media: Option<MediaRef>,
}

impl Message {
    /// Whether the message carries a photo attachment
    pub fn has_photo(&self) -> bool {
        matches!(&self.media, Some(m) if m.kind == MediaKind::Photo)
    }
}

/// One output row, created once per message and never mutated
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputRecord {
    /// Channel display title
    pub channel_title: String,
    /// Channel reference as configured
    pub channel_reference: String,
    /// Message id
    pub message_id: MessageId,
    /// Message text
    pub text: String,
    /// Message timestamp
    pub date: DateTime<Utc>,
    /// Downloaded media path (None when absent or failed)
    pub media_path: Option<PathBuf>,
}

impl OutputRecord {
    /// Build the record for `message` scraped from `channel`.
    pub fn new(channel: &ResolvedChannel, message: &Message, media_path: Option<PathBuf>) -> Self {
        Self {
            channel_title: channel.title.clone(),
            channel_reference: channel.reference.original().to_string(),
            message_id: message.id,
            text: message.text.clone(),
            date: message.date,
            media_path,
        }
    }
}

/// Per-channel scrape state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Not started yet
    Pending,
    /// Resolving the reference
    Resolving,
    /// Reading history pages
    Paginating,
    /// Downloading an attachment
    FetchingMedia,
    /// Writing a record
    Writing,
    /// Finished successfully
    Done,
    /// Abandoned after an error
    Failed,
}

impl ChannelState {
    /// Whether no further transitions happen from this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Done | ChannelState::Failed)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Pending => "pending",
            ChannelState::Resolving => "resolving",
            ChannelState::Paginating => "paginating",
            ChannelState::FetchingMedia => "fetching_media",
            ChannelState::Writing => "writing",
            ChannelState::Done => "done",
            ChannelState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Event emitted during a run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Session established
    Connected,

    /// Channel processing started
    ChannelStarted {
        /// Channel reference
        channel: String,
    },

    /// Channel reference resolved
    ChannelResolved {
        /// Channel reference
        channel: String,
        /// Service id
        id: ChannelId,
        /// Display title
        title: String,
    },

    /// Record written to the sink
    RecordWritten {
        /// Channel reference
        channel: String,
        /// Message id
        message_id: MessageId,
        /// Media path, if an attachment was stored
        #[serde(skip_serializing_if = "Option::is_none")]
        media_path: Option<PathBuf>,
    },

    /// Attachment download failed; record written without media
    MediaFailed {
        /// Channel reference
        channel: String,
        /// Message id
        message_id: MessageId,
        /// Error message
        error: String,
    },

    /// Channel reached `Done`
    ChannelCompleted {
        /// Channel reference
        channel: String,
        /// Records written
        records: u64,
        /// Attachments stored
        media_files: u64,
    },

    /// Channel reached `Failed`
    ChannelFailed {
        /// Channel reference
        channel: String,
        /// State the channel was in when it failed
        state: ChannelState,
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },

    /// Run finished
    RunComplete {
        /// Channels that completed
        succeeded: usize,
        /// Channels that failed
        failed: usize,
        /// Total records written
        records: u64,
    },

    /// Session closed
    Disconnected,
}
