//! Per-channel state machine.
//!
//! `Pending -> Resolving -> Paginating -> (FetchingMedia? -> Writing)* -> Done`, with
//! `Failed` reachable from every non-terminal state. Network steps race the run's
//! cancellation token; record writes are never interrupted once submitted.

use super::Scraper;
use super::summary::ChannelOutcome;
use crate::error::{Error, FailureScope, Result};
use crate::media::MediaFetcher;
use crate::paginator::paginate;
use crate::resolver;
use crate::session::Session;
use crate::sink::SinkHandle;
use crate::types::{ChannelRef, ChannelState, Event, OutputRecord};
use futures::StreamExt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Everything a channel worker shares with the rest of the run
pub(super) struct ChannelContext {
    pub(super) session: Session,
    pub(super) sink: SinkHandle,
    pub(super) fetcher: MediaFetcher,
    /// Run token: cancelled by signal, deadline or a run-level failure
    pub(super) cancel: CancellationToken,
    pub(super) max_messages: usize,
    pub(super) page_size: usize,
}

struct Progress {
    state: ChannelState,
    records: u64,
    media_files: u64,
}

impl Progress {
    fn enter(&mut self, reference: &ChannelRef, state: ChannelState) {
        debug_assert!(
            !self.state.is_terminal(),
            "channel {reference} left terminal state {}",
            self.state
        );
        tracing::trace!(channel = %reference, from = %self.state, to = %state, "channel state");
        self.state = state;
    }
}

/// Race `future` against cancellation
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

impl Scraper {
    /// Scrape one channel to a terminal state.
    pub(super) async fn scrape_channel(
        &self,
        ctx: &ChannelContext,
        reference: ChannelRef,
    ) -> ChannelOutcome {
        let name = reference.original().to_string();
        if ctx.cancel.is_cancelled() {
            return ChannelOutcome::Cancelled { reference: name };
        }

        tracing::info!(channel = %reference, "scraping channel");
        self.emit_event(Event::ChannelStarted {
            channel: name.clone(),
        });

        let mut progress = Progress {
            state: ChannelState::Pending,
            records: 0,
            media_files: 0,
        };

        match self.run_channel(ctx, &reference, &mut progress).await {
            Ok(()) => {
                progress.enter(&reference, ChannelState::Done);
                tracing::info!(
                    channel = %reference,
                    records = progress.records,
                    media_files = progress.media_files,
                    "channel done"
                );
                self.emit_event(Event::ChannelCompleted {
                    channel: name.clone(),
                    records: progress.records,
                    media_files: progress.media_files,
                });
                ChannelOutcome::Completed {
                    reference: name,
                    records: progress.records,
                    media_files: progress.media_files,
                }
            }
            Err(Error::Cancelled) => {
                tracing::warn!(
                    channel = %reference,
                    state = %progress.state,
                    records = progress.records,
                    "channel cancelled"
                );
                self.emit_event(Event::ChannelFailed {
                    channel: name.clone(),
                    state: progress.state,
                    code: Error::Cancelled.error_code().to_string(),
                    error: Error::Cancelled.to_string(),
                });
                ChannelOutcome::Cancelled { reference: name }
            }
            Err(error) => {
                let state = progress.state;
                self.emit_event(Event::ChannelFailed {
                    channel: name.clone(),
                    state,
                    code: error.error_code().to_string(),
                    error: error.to_string(),
                });

                if error.scope() == FailureScope::Run {
                    tracing::error!(
                        channel = %reference,
                        state = %state,
                        error = %error,
                        "run-level failure, aborting run"
                    );
                    ctx.cancel.cancel();
                    ChannelOutcome::Aborted {
                        reference: name,
                        state,
                        error,
                    }
                } else {
                    progress.enter(&reference, ChannelState::Failed);
                        tracing::warn!(
                        channel = %reference,
                        state = %state,
                        records = progress.records,
                        error = %error,
                        "channel failed"
                    );
                    ChannelOutcome::Failed {
                        reference: name,
                        state,
                        error,
                    }
                }
            }
        }
    }

    async fn run_channel(
        &self,
        ctx: &ChannelContext,
        reference: &ChannelRef,
        progress: &mut Progress,
    ) -> Result<()> {
        progress.enter(reference, ChannelState::Resolving);
        let channel = cancellable(&ctx.cancel, resolver::resolve(&ctx.session, reference)).await?;
        self.emit_event(Event::ChannelResolved {
            channel: reference.original().to_string(),
            id: channel.id,
            title: channel.title.clone(),
        });

        progress.enter(reference, ChannelState::Paginating);
        let messages = paginate(&ctx.session, &channel, ctx.max_messages, ctx.page_size);
        let mut messages = std::pin::pin!(messages);

        while let Some(message) =
            cancellable(&ctx.cancel, async { Ok(messages.next().await) }).await?
        {
            let message = message?;

            let media_path = if ctx.fetcher.wants(&message) {
                progress.enter(reference, ChannelState::FetchingMedia);
                match cancellable(&ctx.cancel, ctx.fetcher.fetch(&ctx.session, &channel, &message))
                    .await
                {
                    Ok(path) => {
                        if path.is_some() {
                            progress.media_files += 1;
                        }
                        path
                    }
                    Err(e) if e.scope() == FailureScope::Message => {
                        tracing::warn!(
                            channel = %reference,
                            message_id = %message.id,
                            error = %e,
                            "media download failed, writing record without media"
                        );
                        self.emit_event(Event::MediaFailed {
                            channel: reference.original().to_string(),
                            message_id: message.id,
                            error: e.to_string(),
                        });
                        None
                    }
                    Err(e) => return Err(e),
                }
            } else {
                None
            };

            progress.enter(reference, ChannelState::Writing);
            let record = OutputRecord::new(&channel, &message, media_path.clone());
            ctx.sink.write(record).await?;
            progress.records += 1;
            self.emit_event(Event::RecordWritten {
                channel: reference.original().to_string(),
                message_id: message.id,
                media_path,
            });

            progress.enter(reference, ChannelState::Paginating);
        }

        Ok(())
    }
}
