//! ResourceStream trait and in-memory implementations

use super::record::Record;
use crate::graph::Properties;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while reading input records
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Table '{table}' has no primary key; add one or pass it explicitly")]
    MissingPrimaryKey { table: String },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Source error: {0}")]
    Other(String),
}

/// One pass over a stream's records
pub type RecordIter = Box<dyn Iterator<Item = Result<Record, SourceError>> + Send>;

/// A finite, restartable sequence of records.
///
/// Every call to `open()` starts a fresh pass without side effects on the
/// underlying source. Implementations must be shareable across threads.
pub trait ResourceStream: Send + Sync {
    /// Start a new pass over the records
    fn open(&self) -> Result<RecordIter, SourceError>;

    /// Number of records a pass yields, when known up front
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Records held in memory, typically rows of one dataframe.
#[derive(Debug, Clone)]
pub struct VecStream {
    records: Arc<[Record]>,
}

impl VecStream {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// Build one record of `record_type` per row.
    pub fn from_rows<I>(record_type: &str, identifying: &[&str], rows: I) -> Self
    where
        I: IntoIterator<Item = Properties>,
    {
        let records = rows
            .into_iter()
            .map(|row| {
                let mut record = Record::new(record_type)
                    .with_identifying(identifying.iter().copied());
                for (key, value) in row {
                    record.set(key, value);
                }
                record
            })
            .collect::<Vec<_>>();
        Self::new(records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ResourceStream for VecStream {
    fn open(&self) -> Result<RecordIter, SourceError> {
        let records = Arc::clone(&self.records);
        Ok(Box::new(
            (0..records.len()).map(move |i| Ok::<_, SourceError>(records[i].clone())),
        ))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.records.len())
    }
}

/// Concatenation of several streams, read one after the other.
#[derive(Clone, Default)]
pub struct ChainStream {
    streams: Vec<Arc<dyn ResourceStream>>,
}

impl ChainStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, stream: impl ResourceStream + 'static) -> Self {
        self.streams.push(Arc::new(stream));
        self
    }

    pub fn push(&mut self, stream: Arc<dyn ResourceStream>) {
        self.streams.push(stream);
    }
}

impl ResourceStream for ChainStream {
    fn open(&self) -> Result<RecordIter, SourceError> {
        let passes = self
            .streams
            .iter()
            .map(|s| s.open())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(passes.into_iter().flatten()))
    }

    fn len_hint(&self) -> Option<usize> {
        self.streams.iter().map(|s| s.len_hint()).sum()
    }
}
