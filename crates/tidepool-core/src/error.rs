//! Typed errors for an extraction run.

use arrow::error::ArrowError;
use thiserror::Error;

/// Errors that abort an extraction run.
///
/// Every variant is fatal to the run; nothing at this layer retries.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Transport, auth or query failure while counting or fetching rows.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source reported rows but no chunk produced any.
    #[error("empty result: source reported {expected} rows but no chunk returned data")]
    EmptyResult { expected: u64 },

    /// A chunk came back empty before the planned end (strict policy only).
    #[error("partial result: source reported {expected} rows, gathered {gathered}")]
    PartialResult { expected: u64, gathered: u64 },

    /// Writing the destination artifact failed.
    #[error("sink write failed: {0}")]
    SinkWriteFailure(String),

    /// A table identifier that is not `project.dataset.table`.
    #[error("invalid table reference: {0}")]
    InvalidTableRef(String),

    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Batches could not be assembled into one table.
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

impl From<datafusion::error::DataFusionError> for ExtractError {
    fn from(e: datafusion::error::DataFusionError) -> Self {
        ExtractError::SourceUnavailable(e.to_string())
    }
}

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;
