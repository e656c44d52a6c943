//! Attachment downloads

use crate::config::Config;
use crate::error::{DownloadError, Error, FailureScope, Result};
use crate::rate_limiter::RateLimiter;
use crate::session::Session;
use crate::types::{MediaKind, Message, ResolvedChannel};
use crate::utils::{media_filename, write_atomic};
use std::path::{Path, PathBuf};

/// Downloads attachments of the configured kinds into the media directory
#[derive(Clone, Debug)]
pub struct MediaFetcher {
    media_dir: PathBuf,
    kinds: Vec<MediaKind>,
    limiter: RateLimiter,
}

impl MediaFetcher {
    /// Create a fetcher writing into `media_dir`, downloading only `kinds`, at most
    /// `downloads_per_second` (None = unlimited).
    pub fn new(
        media_dir: impl Into<PathBuf>,
        kinds: Vec<MediaKind>,
        downloads_per_second: Option<u64>,
    ) -> Self {
        Self {
            media_dir: media_dir.into(),
            kinds,
            limiter: RateLimiter::new(downloads_per_second),
        }
    }

    /// Fetcher configured from the output, scrape and rate-limit sections
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.output.media_dir.clone(),
            config.scrape.media_kinds.clone(),
            config.rate_limit.media_downloads_per_second,
        )
    }

    /// Destination directory
    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Create the media directory if needed.
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.media_dir).await?;
        Ok(())
    }

    /// Whether `message` carries an attachment this fetcher downloads
    pub fn wants(&self, message: &Message) -> bool {
        message
            .media
            .as_ref()
            .is_some_and(|m| self.kinds.contains(&m.kind))
    }

    /// Download the attachment of `message`, if it is of a wanted kind.
    ///
    /// Returns `Ok(None)` for messages without a wanted attachment. The file name is
    /// derived from the channel reference and message id, so re-running overwrites the
    /// same file. The file is complete and non-empty once a path is returned.
    ///
    /// # Errors
    /// [`Error::Download`] for service, empty-payload and write failures, including
    /// transient failures that outlast their retries. Errors that end the whole run
    /// (closed session, rejected token) are returned unchanged.
    pub async fn fetch(
        &self,
        session: &Session,
        channel: &ResolvedChannel,
        message: &Message,
    ) -> Result<Option<PathBuf>> {
        let Some(media) = message.media.as_ref().filter(|_| self.wants(message)) else {
            return Ok(None);
        };
        let message_id = message.id.get();

        self.limiter.acquire().await;
        let backend = session.backend();
        let token = session.token();
        let bytes = session
            .call("download_media", || async move {
                backend.download_media(token, media).await
            })
            .await
            .map_err(|e| {
                // A download that outlasts its retries only costs this record
                let ends_run =
                    e.scope() == FailureScope::Run && !matches!(e, Error::Unavailable { .. });
                if ends_run {
                    e
                } else {
                    Error::Download(DownloadError::Fetch {
                        message_id,
                        reason: e.to_string(),
                    })
                }
            })?;

        if bytes.is_empty() {
            return Err(DownloadError::EmptyPayload { message_id }.into());
        }

        let path = self
            .media_dir
            .join(media_filename(&channel.reference, message.id, media.kind));
        write_atomic(&path, &bytes)
            .await
            .map_err(|e| DownloadError::Write {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            channel = %channel.reference,
            message_id,
            path = %path.display(),
            bytes = bytes.len(),
            "media stored"
        );
        Ok(Some(path))
    }
}
