//! # channel-dl
//!
//! Scrapes message history and photos from public messaging channels into a CSV file
//! and a media directory.
//!
//! ## Design
//!
//! - **One session per run** - [`SessionManager`] logs in once (reusing a stored
//!   token when possible) and hands out a shared [`session::Session`]
//! - **Lazy pagination** - history is streamed page by page, bounded by a per-channel cap
//! - **Failure scoping** - a failed download degrades one record, a failed channel never
//!   stops the others, only auth and sink failures end the run
//! - **Single writer** - every record goes through one CSV writer thread, flushed per row
//! - **Event-driven** - embedders subscribe to [`Event`]s instead of polling
//!
//! ## Quick Start
//!
//! ```no_run
//! use channel_dl::{Config, HttpBackend, Scraper, StdinCode};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config {
//!         channels: vec!["@DoctorsET".to_string(), "@lobelia4cosmetics".to_string()],
//!         ..Default::default()
//!     };
//!     config.apply_env()?;
//!
//!     let backend = Arc::new(HttpBackend::from_config(&config.service)?);
//!     let scraper = Scraper::new(config, backend)?;
//!
//!     let mut events = scraper.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = scraper.run(&StdinCode).await?;
//!     std::process::exit(summary.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote service abstraction and the HTTP gateway backend
pub mod backend;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Attachment downloads
pub mod media;
/// Lazy message pagination
pub mod paginator;
/// Token-bucket rate limiting
pub mod rate_limiter;
/// Channel resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Run orchestration (decomposed into focused submodules)
pub mod scraper;
/// Session lifecycle
pub mod session;
/// CSV record output
pub mod sink;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use backend::{Credentials, HttpBackend, MessagingBackend};
pub use config::Config;
pub use error::{DownloadError, Error, FailureScope, Result, WriterError};
pub use scraper::{ChannelFailure, ChannelReport, RunSummary, Scraper};
pub use session::{CodeProvider, SessionManager, StaticCode, StdinCode};
pub use types::{ChannelId, ChannelRef, ChannelState, Event, MediaKind, MessageId, OutputRecord};

/// Run the scraper, cancelling it on a termination signal.
///
/// The run still closes the output and disconnects after a signal; the returned
/// summary lists the channels that were cut short.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use channel_dl::{Config, HttpBackend, Scraper, StdinCode, run_with_signals};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::load(std::path::Path::new("channel-dl.toml"))?;
///     let backend = Arc::new(HttpBackend::from_config(&config.service)?);
///     let scraper = Scraper::new(config, backend)?;
///
///     let summary = run_with_signals(&scraper, &StdinCode).await?;
///     std::process::exit(summary.exit_code());
/// }
/// ```
pub async fn run_with_signals(scraper: &Scraper, codes: &dyn CodeProvider) -> Result<RunSummary> {
    let token = scraper.cancel_token();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                tracing::warn!("cancelling run");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });

    let result = scraper.run(codes).await;
    watcher.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            // Never resolve, so a broken signal listener does not cancel the run
            std::future::pending::<()>().await;
        }
    }
}
