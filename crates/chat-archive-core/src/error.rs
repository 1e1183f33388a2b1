//! Error types for the import pipeline.
//!
//! Reference failures inside a well-formed payload are not errors; they are
//! collected in the [`ImportReport`](crate::import::ImportReport). An
//! [`ImportError`] aborts the whole import call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    /// The payload is not valid JSON or does not have the export shape
    /// (missing section, non-numeric timestamp, ...).
    #[error("malformed export: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload decoded but is internally inconsistent.
    #[error("invalid export: {0}")]
    Invalid(String),

    /// The export file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}
