//! Error types for seqmotif.

use thiserror::Error;

/// seqmotif error types.
#[derive(Error, Debug)]
pub enum MotifError {
    /// Invalid construction parameters (decay pairing, shapes, weights)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input shape does not match the model it is handed to
    #[error("Dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Autoregressive fit failed for one trace
    #[error("Deconvolution failed: {0}")]
    Deconvolution(String),

    /// Penalty name not recognised
    #[error("Unknown penalty: {0}")]
    UnknownPenalty(String),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Worker pool could not be built
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

/// Result type alias for seqmotif operations.
pub type Result<T> = std::result::Result<T, MotifError>;
