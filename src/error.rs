//! Error types for the vitals engine

use thiserror::Error;

/// Errors that can occur during computation.
///
/// Missing or sparse data is not an error: analyses report it through
/// [`crate::types::Analysis`]. Only configuration mistakes, malformed input
/// and store failures surface here.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] ValidationError),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Store error: {0}")]
    StoreError(String),
}

/// Per-record validation failures.
///
/// These never abort a batch; the pipeline records them as skipped records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Heart rate {bpm} bpm outside plausible range [{min}, {max}]")]
    HeartRateOutOfRange { bpm: u16, min: u16, max: u16 },

    #[error("Confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("Timestamp {timestamp} is in the future (now {now})")]
    FutureTimestamp { timestamp: String, now: String },

    #[error("End {end} is not after start {start}")]
    EndBeforeStart { start: String, end: String },

    #[error("Negative value for {field}: {value}")]
    NegativeValue { field: &'static str, value: f64 },
}
