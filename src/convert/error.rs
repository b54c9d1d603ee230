//! Errors surfaced by a conversion run

use super::Phase;
use crate::resource::SourceError;
use crate::rules::RuleError;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    /// A rule chain failed on one record. Never retried.
    #[error("{phase} rules failed on {record_type}({record}): {source}")]
    Rule {
        phase: Phase,
        record_type: String,
        /// Identifying fields of the offending record
        record: String,
        #[source]
        source: RuleError,
    },

    /// A commit kept failing after every retry
    #[error("{phase} commit failed after {attempts} attempt(s): {source}")]
    Store {
        phase: Phase,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Parcel error: {0}")]
    Codec(String),

    /// A worker task panicked or was lost
    #[error("Worker failed: {0}")]
    Worker(String),
}

impl ConvertError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConvertError::Cancelled)
    }
}

pub type ConvertResult<T> = Result<T, ConvertError>;
