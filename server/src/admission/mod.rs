//! Admission Control
//!
//! Bounded-concurrency gate in front of handler execution.

pub mod gate;

pub use gate::{AdmissionGate, AdmissionLease, DEFAULT_ADMISSION_CAPACITY};

use std::time::Duration;

use thiserror::Error;

/// Why a lease could not be acquired.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// The caller's cancellation token fired while waiting.
    #[error("Admission cancelled")]
    Cancelled,

    /// No permit freed up within the allowed wait.
    #[error("Admission timed out after {0:?}")]
    TimedOut(Duration),

    /// The gate was shut down.
    #[error("Admission gate closed")]
    Closed,
}
