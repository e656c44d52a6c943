//! Run orchestration split into focused submodules.
//!
//! The `Scraper` struct and its methods are organized by concern:
//! - [`lifecycle`] - Run setup, connect, channel fan-out and teardown
//! - [`channel_task`] - Per-channel state machine
//! - [`summary`] - Outcome collection and the final run summary

mod channel_task;
mod lifecycle;
mod summary;


pub use summary::{ChannelFailure, ChannelReport, RunSummary};

use crate::backend::MessagingBackend;
use crate::config::Config;
use crate::error::Result;
use crate::session::SessionManager;
use crate::types::{ChannelRef, Event};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 1000;

/// Scrape orchestrator (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Scraper {
    /// Configuration (wrapped in Arc for sharing across channel workers)
    pub(crate) config: Arc<Config>,
    /// Owner of the run's single session
    pub(crate) sessions: Arc<SessionManager>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Cancels the run (external signal); deadlines and aborts use child tokens
    pub(crate) cancel: CancellationToken,
    /// Make the output writer fail after this many rows
    #[cfg(test)]
    pub(crate) writer_fails_after: Option<u64>,
}

impl Scraper {
    /// Create a scraper for `config` talking to `backend`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] if the configuration is invalid.
    pub fn new(config: Config, backend: Arc<dyn MessagingBackend>) -> Result<Self> {
        config.validate()?;
        let sessions = Arc::new(SessionManager::new(backend, &config));
        let (event_tx, _rx) = tokio::sync::broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            sessions,
            event_tx,
            cancel: CancellationToken::new(),
            #[cfg(test)]
            writer_fails_after: None,
        })
    }

    /// Subscribe to run events
    ///
    /// Subscribers that fall more than the channel capacity behind miss events
    /// (`RecvError::Lagged`).
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that cancels the run when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the run: no new requests are issued, in-flight writes complete and the
    /// session is disconnected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }

    /// Configured references in order, blanks and duplicates removed
    pub(crate) fn channel_refs(&self) -> Vec<ChannelRef> {
        let mut seen = HashSet::new();
        self.config
            .channels
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| ChannelRef::parse(c))
            .filter(|r| {
                let first = seen.insert(r.dedup_key());
                if !first {
                    tracing::info!(channel = %r, "skipping duplicate channel reference");
                }
                first
            })
            .collect()
    }
}
