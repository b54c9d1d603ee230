//! Storage trait definitions

use crate::graph::{Fragment, Node, Properties, PropertyValue};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store could not complete the write right now; worth retrying
    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Merge on :{label}({key}={value}) matched {matches} elements")]
    MergeConflict {
        label: String,
        key: String,
        value: String,
        matches: usize,
    },

    #[error("Relationship endpoint not found: {0}")]
    MissingEndpoint(String),
}

impl StorageError {
    /// True for failures that a later attempt may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Transient(_) | StorageError::Database(_) | StorageError::Io(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for graph storage backends.
///
/// Both write paths are atomic per call: either every element of the
/// fragment is written and has its identity assigned, or nothing is and the
/// fragment is left untouched. Implementations must be thread-safe (Send +
/// Sync); the engine shares one store across all workers.
///
/// Relationship endpoints are resolved in this order: the endpoint's
/// identity, a node committed earlier under the same handle, and finally
/// the endpoint itself (merged when keyed, created otherwise).
pub trait GraphStore: Send + Sync {
    /// Blind insert of every uncommitted node and relationship
    fn create(&self, fragment: &mut Fragment) -> StorageResult<()>;

    /// Idempotent upsert.
    ///
    /// Keyed nodes match on `(merge_label, key, value)`; keyed relationships
    /// on `(type, start, end)` plus the key property unless the key is the
    /// ghost marker. More than one match is a `MergeConflict`.
    fn merge(&self, fragment: &mut Fragment) -> StorageResult<()>;

    /// Committed nodes carrying every label in `labels` and whose
    /// properties equal every condition. A `Null` condition matches an
    /// absent property.
    fn match_nodes(&self, labels: &[String], conditions: &Properties) -> StorageResult<Vec<Node>>;

    /// Number of nodes, optionally restricted to one label
    fn node_count(&self, label: Option<&str>) -> StorageResult<usize>;

    /// Number of relationships, optionally restricted to one type
    fn relationship_count(&self, rel_type: Option<&str>) -> StorageResult<usize>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}

/// Property equality where `Null` stands for "absent".
pub(crate) fn property_matches(properties: &Properties, key: &str, expected: &PropertyValue) -> bool {
    match properties.get(key) {
        Some(actual) => actual == expected,
        None => expected.is_null(),
    }
}

pub(crate) fn conditions_match(properties: &Properties, conditions: &Properties) -> bool {
    conditions
        .iter()
        .all(|(key, expected)| property_matches(properties, key, expected))
}
