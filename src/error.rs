//! Error types for channel-dl
//!
//! This module provides the error taxonomy for the scraping pipeline:
//! - Domain-specific error types (download, writer, session, resolution)
//! - Scope classification deciding how far a failure propagates (message, channel, run)
//! - Machine-readable error codes used in run summaries and events

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for channel-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for channel-dl
///
/// Each variant carries enough context to be logged against a channel reference and
/// reported in the final run summary.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "output_path")
        key: Option<String>,
    },

    /// Credentials rejected or session expired
    #[error("authentication error: {0}")]
    Auth(String),

    /// Transient network failure (unreachable service, timeout, 5xx)
    #[error("network error: {0}")]
    Network(String),

    /// HTTP client error that was not classified as transient at the call site
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel reference could not be mapped to a channel
    #[error("channel not found: {reference}")]
    ChannelNotFound {
        /// The configured reference that failed to resolve
        reference: String,
    },

    /// The service throttled the request
    #[error("rate limited: retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// How long the service asked us to wait
        retry_after: Duration,
    },

    /// Non-transient error reported by the service (bad request, missing resource)
    #[error("service error ({status}): {message}")]
    Service {
        /// HTTP status returned by the service
        status: u16,
        /// Body or reason returned by the service
        message: String,
    },

    /// The service answered with a body we could not decode
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A transient failure outlasted every retry; the service is treated as down
    #[error("service unavailable: {operation} failed after {attempts} attempts: {reason}")]
    Unavailable {
        /// Session operation that gave up
        operation: &'static str,
        /// Attempts made, including the first
        attempts: u32,
        /// Last transient error
        reason: String,
    },

    /// Media download error (message-level, never fails a channel)
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Output sink error (fatal for the run)
    #[error("writer error: {0}")]
    Writer(#[from] WriterError),

    /// Session has been disconnected; no further requests are issued
    #[error("session is closed")]
    SessionClosed,

    /// A session is already active on this manager
    #[error("a session is already connected")]
    AlreadyConnected,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Run cancelled by deadline or external signal
    #[error("run cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Media download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The service returned zero bytes for the attachment
    #[error("empty media payload for message {message_id}")]
    EmptyPayload {
        /// Message whose attachment was empty
        message_id: i64,
    },

    /// Fetching the attachment from the service failed
    #[error("failed to fetch media for message {message_id}: {reason}")]
    Fetch {
        /// Message whose attachment could not be fetched
        message_id: i64,
        /// Underlying service or network error
        reason: String,
    },

    /// Writing the attachment to the media directory failed
    #[error("failed to write media to {path}: {reason}")]
    Write {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        reason: String,
    },
}

/// Output sink errors
#[derive(Debug, Error)]
pub enum WriterError {
    /// The output file could not be opened or created
    #[error("failed to open output {path}: {reason}")]
    Open {
        /// Output path
        path: PathBuf,
        /// Underlying I/O error
        reason: String,
    },

    /// CSV serialization failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Flushing or syncing the output file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The writer task is gone (a previous write failed or the sink was closed)
    #[error("record sink is closed")]
    Closed,
}

/// How far a failure propagates through the pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureScope {
    /// Degrade the current record and continue the channel
    Message,
    /// Abandon the current channel and continue the run
    Channel,
    /// Abort the whole run
    Run,
}

impl Error {
    /// Classify how far this error propagates.
    pub fn scope(&self) -> FailureScope {
        match self {
            Error::Download(_) => FailureScope::Message,

            Error::ChannelNotFound { .. }
            | Error::RateLimited { .. }
            | Error::Network(_)
            | Error::Http(_)
            | Error::Service { .. }
            | Error::Protocol(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Other(_) => FailureScope::Channel,

            Error::Auth(_)
            | Error::Unavailable { .. }
            | Error::Config { .. }
            | Error::Writer(_)
            | Error::SessionClosed
            | Error::AlreadyConnected
            | Error::Cancelled => FailureScope::Run,
        }
    }

    /// Machine-readable error code, stable across releases.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Auth(_) => "auth_error",
            Error::Network(_) => "network_error",
            Error::Http(_) => "http_error",
            Error::ChannelNotFound { .. } => "channel_not_found",
            Error::RateLimited { .. } => "rate_limited",
            Error::Service { .. } => "service_error",
            Error::Protocol(_) => "protocol_error",
            Error::Unavailable { .. } => "service_unavailable",
            Error::Download(e) => match e {
                DownloadError::EmptyPayload { .. } => "empty_media",
                DownloadError::Fetch { .. } => "media_fetch_failed",
                DownloadError::Write { .. } => "media_write_failed",
            },
            Error::Writer(_) => "writer_error",
            Error::SessionClosed => "session_closed",
            Error::AlreadyConnected => "already_connected",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// Returns (Error, expected_scope, expected_error_code) for every match arm.
    fn all_error_variants() -> Vec<(Error, FailureScope, &'static str)> {
        vec![
            (
                Error::Config {
                    message: "no channels".into(),
                    key: Some("channels".into()),
                },
                FailureScope::Run,
                "config_error",
            ),
            (
                Error::Auth("invalid code".into()),
                FailureScope::Run,
                "auth_error",
            ),
            (
                Error::Network("connection refused".into()),
                FailureScope::Channel,
                "network_error",
            ),
            (
                Error::ChannelNotFound {
                    reference: "@missing".into(),
                },
                FailureScope::Channel,
                "channel_not_found",
            ),
            (
                Error::RateLimited {
                    retry_after: Duration::from_secs(300),
                },
                FailureScope::Channel,
                "rate_limited",
            ),
            (
                Error::Service {
                    status: 400,
                    message: "bad offset".into(),
                },
                FailureScope::Channel,
                "service_error",
            ),
            (
                Error::Protocol("missing field `id`".into()),
                FailureScope::Channel,
                "protocol_error",
            ),
            (
                Error::Unavailable {
                    operation: "fetch_history",
                    attempts: 6,
                    reason: "network error: connection reset".into(),
                },
                FailureScope::Run,
                "service_unavailable",
            ),
            (
                Error::Download(DownloadError::EmptyPayload { message_id: 2 }),
                FailureScope::Message,
                "empty_media",
            ),
            (
                Error::Download(DownloadError::Fetch {
                    message_id: 2,
                    reason: "503".into(),
                }),
                FailureScope::Message,
                "media_fetch_failed",
            ),
            (
                Error::Download(DownloadError::Write {
                    path: PathBuf::from("photos/a_2.jpg"),
                    reason: "disk full".into(),
                }),
                FailureScope::Message,
                "media_write_failed",
            ),
            (
                Error::Writer(WriterError::Closed),
                FailureScope::Run,
                "writer_error",
            ),
            (Error::SessionClosed, FailureScope::Run, "session_closed"),
            (Error::AlreadyConnected, FailureScope::Run, "already_connected"),
            (
                Error::Io(std::io::Error::other("boom")),
                FailureScope::Channel,
                "io_error",
            ),
            (
                Error::Serialization(serde_json::from_str::<String>("{").unwrap_err()),
                FailureScope::Channel,
                "serialization_error",
            ),
            (Error::Cancelled, FailureScope::Run, "cancelled"),
            (
                Error::Other("unexpected".into()),
                FailureScope::Channel,
                "internal_error",
            ),
        ]
    }

    #[test]
    fn every_variant_maps_to_expected_scope() {
        for (error, expected_scope, code) in all_error_variants() {
            assert_eq!(
                error.scope(),
                expected_scope,
                "error_code={code} classified with the wrong scope"
            );
        }
    }

    #[test]
    fn every_variant_maps_to_expected_error_code() {
        for (error, _, expected_code) in all_error_variants() {
            assert_eq!(error.error_code(), expected_code);
        }
    }

    #[test]
    fn download_errors_never_escalate_past_message_scope() {
        let err = Error::from(DownloadError::Fetch {
            message_id: 7,
            reason: "timeout".into(),
        });
        assert_eq!(err.scope(), FailureScope::Message);
    }

    #[test]
    fn writer_errors_abort_the_run() {
        let err = Error::from(WriterError::Io(std::io::Error::other("disk full")));
        assert_eq!(
            err.scope(),
            FailureScope::Run,
            "losing the sink invalidates all later work"
        );
    }

    #[test]
    fn rate_limited_display_includes_wait_seconds() {
        let err = Error::RateLimited {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.to_string(), "rate limited: retry after 42s");
    }

    #[test]
    fn channel_not_found_display_names_reference() {
        let err = Error::ChannelNotFound {
            reference: "@EAHCI".into(),
        };
        assert_eq!(err.to_string(), "channel not found: @EAHCI");
    }
}
