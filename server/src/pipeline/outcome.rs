//! Pipeline outcomes.

use serde::Serialize;

/// Terminal state of one event's run through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Handlers ran to completion.
    Completed,
    /// Event id already processed; no handler ran.
    Duplicate,
    DecryptFailed,
    /// No admission slot freed up within the admission timeout.
    AdmissionTimeout,
    /// The caller's request was cancelled.
    Cancelled,
    /// Handlers exceeded the handler timeout.
    TimedOut,
    /// A handler returned an error or panicked.
    Faulted,
}

impl Disposition {
    /// Duplicates count as success so the platform stops redelivering.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Completed | Self::Duplicate)
    }

    pub const fn reason(self) -> Option<&'static str> {
        match self {
            Self::Completed | Self::Duplicate => None,
            Self::DecryptFailed => Some("Decryption failed"),
            Self::AdmissionTimeout => Some("Admission timeout"),
            Self::Cancelled => Some("Operation cancelled"),
            Self::TimedOut => Some("Event handling timeout"),
            Self::Faulted => Some("Internal server error"),
        }
    }
}

/// `(success, reason)` report for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineOutcome {
    pub disposition: Disposition,
    pub success: bool,
    pub reason: Option<&'static str>,
    pub event_id: Option<String>,
}

impl PipelineOutcome {
    pub fn new(disposition: Disposition, event_id: Option<String>) -> Self {
        Self {
            disposition,
            success: disposition.is_success(),
            reason: disposition.reason(),
            event_id,
        }
    }
}
