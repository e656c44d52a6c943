//! Channel outcomes and the run summary.

use crate::error::Error;
use crate::types::ChannelState;

/// How one channel ended
#[derive(Debug)]
pub(crate) enum ChannelOutcome {
    /// Reached `Done`
    Completed {
        reference: String,
        records: u64,
        media_files: u64,
    },
    /// Reached `Failed` on a channel-level error
    Failed {
        reference: String,
        state: ChannelState,
        error: Error,
    },
    /// Stopped by cancellation or deadline
    Cancelled { reference: String },
    /// Hit a run-level error; the run is being aborted
    Aborted {
        reference: String,
        state: ChannelState,
        error: Error,
    },
}

/// A completed channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelReport {
    /// Channel reference as configured
    pub reference: String,
    /// Records written
    pub records: u64,
    /// Attachments stored
    pub media_files: u64,
}

/// A failed channel and why
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelFailure {
    /// Channel reference as configured
    pub reference: String,
    /// State the channel was in when it failed
    pub state: ChannelState,
    /// Machine-readable error code
    pub code: String,
    /// Human-readable reason
    pub message: String,
}

/// Result of a run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Channels that completed, in configured order
    pub succeeded: Vec<ChannelReport>,
    /// Channels that failed, in configured order
    pub failed: Vec<ChannelFailure>,
    /// Channels stopped by cancellation or deadline
    pub cancelled: Vec<String>,
    /// Rows written to the output file
    pub records: u64,
    /// Run-level error that stopped the run early, if any
    pub aborted: Option<String>,
}

impl RunSummary {
    /// Build the summary from per-channel outcomes (already in configured order).
    pub(crate) fn from_outcomes(outcomes: Vec<ChannelOutcome>, records: u64) -> Self {
        let mut summary = RunSummary {
            records,
            ..RunSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                ChannelOutcome::Completed {
                    reference,
                    records,
                    media_files,
                } => summary.succeeded.push(ChannelReport {
                    reference,
                    records,
                    media_files,
                }),
                ChannelOutcome::Failed {
                    reference,
                    state,
                    error,
                } => summary.failed.push(ChannelFailure {
                    reference,
                    state,
                    code: error.error_code().to_string(),
                    message: error.to_string(),
                }),
                ChannelOutcome::Cancelled { reference } => summary.cancelled.push(reference),
                ChannelOutcome::Aborted {
                    reference,
                    state,
                    error,
                } => {
                    if summary.aborted.is_none() {
                        summary.aborted = Some(error.to_string());
                    }
                    summary.failed.push(ChannelFailure {
                        reference,
                        state,
                        code: error.error_code().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
        summary
    }

    /// At least one channel completed and nothing aborted the run
    pub fn is_success(&self) -> bool {
        !self.succeeded.is_empty() && self.aborted.is_none()
    }

    /// Process exit code: 0 on success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Log the summary, one line per failed channel
    pub fn log(&self) {
        tracing::info!(
            succeeded = self.succeeded.len(),
            failed = self.failed.len(),
            cancelled = self.cancelled.len(),
            records = self.records,
            "run complete"
        );
        for report in &self.succeeded {
            tracing::info!(
                channel = %report.reference,
                records = report.records,
                media_files = report.media_files,
                "channel completed"
            );
        }
        for failure in &self.failed {
            tracing::warn!(
                channel = %failure.reference,
                state = %failure.state,
                code = %failure.code,
                reason = %failure.message,
                "channel failed"
            );
        }
        if !self.cancelled.is_empty() {
            tracing::warn!(channels = ?self.cancelled, "channels cancelled before completion");
        }
        if let Some(reason) = &self.aborted {
            tracing::error!(reason = %reason, "run aborted");
        }
    }
}
