//! Run setup, channel fan-out and teardown.

use super::Scraper;
use super::channel_task::ChannelContext;
use super::summary::{ChannelOutcome, RunSummary};
use crate::error::{Error, Result};
use crate::media::MediaFetcher;
use crate::session::CodeProvider;
use crate::sink::{RecordSink, RecordWriter};
use crate::types::Event;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

impl Scraper {
    /// Run the scrape over every configured channel.
    ///
    /// The sequence is:
    /// 1. Open the output file and media directory
    /// 2. Connect the session (login code from `codes` if needed)
    /// 3. Scrape channels through a pool of `max_concurrent_channels` workers
    /// 4. Close the sink, disconnect and log the summary
    ///
    /// A channel failing never stops the others. A run-level failure (sink error,
    /// rejected session, a service still down after retries) cancels the remaining
    /// work and is reported in [`RunSummary::aborted`]. Cancellation and the run
    /// deadline stop new requests, let submitted writes finish and still disconnect
    /// cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error when the run cannot start: invalid credentials configuration,
    /// an output file that cannot be opened, or a failed connect.
    pub async fn run(&self, codes: &dyn CodeProvider) -> Result<RunSummary> {
        let credentials = self.config.credentials()?;
        let references = self.channel_refs();
        tracing::info!(channels = references.len(), "starting run");

        let writer = RecordWriter::open(
            &self.config.output.output_path,
            self.config.output.append,
            self.config.output.sync_writes,
        )?;
        #[cfg(test)]
        let writer = match self.writer_fails_after {
            Some(rows) => writer.fail_after(rows),
            None => writer,
        };
        let fetcher = MediaFetcher::from_config(&self.config);
        fetcher.prepare().await?;
        let sink = RecordSink::spawn(writer);

        let run_token = self.cancel.child_token();
        let deadline = self.spawn_deadline(&run_token);

        let connected = tokio::select! {
            biased;
            _ = run_token.cancelled() => Err(Error::Cancelled),
            result = self.sessions.connect(&credentials, codes) => result,
        };
        let session = match connected {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "failed to connect");
                if let Some(deadline) = deadline {
                    deadline.abort();
                }
                if let Err(close_err) = sink.close().await {
                    tracing::warn!(error = %close_err, "failed to close record sink");
                }
                // Nothing to release after a failed connect, but keep teardown uniform
                self.sessions.disconnect().await;
                return Err(e);
            }
        };
        self.emit_event(Event::Connected);

        let ctx = ChannelContext {
            session,
            sink: sink.handle(),
            fetcher,
            cancel: run_token.clone(),
            max_messages: self.config.scrape.max_messages_per_channel,
            page_size: self.config.scrape.page_size,
        };

        let ctx_ref = &ctx;
        let mut outcomes: Vec<(usize, ChannelOutcome)> =
            futures::stream::iter(references.into_iter().enumerate())
                .map(|(index, reference)| async move {
                    (index, self.scrape_channel(ctx_ref, reference).await)
                })
                .buffer_unordered(self.config.scrape.max_concurrent_channels)
                .collect()
                .await;
        outcomes.sort_by_key(|(index, _)| *index);
        drop(ctx);

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let records = match sink.close().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "record sink did not shut down cleanly");
                0
            }
        };
        self.sessions.disconnect().await;
        self.emit_event(Event::Disconnected);

        let summary =
            RunSummary::from_outcomes(outcomes.into_iter().map(|(_, o)| o).collect(), records);
        self.emit_event(Event::RunComplete {
            succeeded: summary.succeeded.len(),
            failed: summary.failed.len(),
            records: summary.records,
        });
        summary.log();
        Ok(summary)
    }

    /// Cancel `run_token` once the configured run timeout elapses.
    fn spawn_deadline(&self, run_token: &CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
        let timeout = self.config.scrape.run_timeout?;
        let token = run_token.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    tracing::warn!(timeout_secs = timeout.as_secs_f64(), "run deadline reached, cancelling");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        }))
    }
}
