//! Relationship representation and primary-key markers

use super::node::{Node, Properties, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Store-assigned identity of a committed relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipId(u64);

impl RelationshipId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marker that routes a relationship into the merge path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum PrimaryKey {
    /// Merge on `(type, start, end)` plus equality of this property
    Property(String),
    /// Merge on `(type, start, end)` only, ignoring properties
    Ghost,
}

/// A typed, directed edge between two nodes.
///
/// Endpoints are held by value; the store resolves them to identities
/// when the relationship is committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub identity: Option<RelationshipId>,
    pub rel_type: String,
    pub start: Node,
    pub end: Node,
    pub properties: Properties,
    /// Absent by default: relationships are create-only and parallel
    /// duplicates are kept
    pub primary_key: Option<PrimaryKey>,
}

impl Relationship {
    pub fn new(start: Node, rel_type: impl Into<String>, end: Node) -> Self {
        Self {
            identity: None,
            rel_type: rel_type.into(),
            start,
            end,
            properties: HashMap::new(),
            primary_key: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_primary_key(mut self, key: PrimaryKey) -> Self {
        self.primary_key = Some(key);
        self
    }

    /// Attach the ghost key: dedup by type and endpoints only.
    pub fn ghost_keyed(mut self) -> Self {
        self.primary_key = Some(PrimaryKey::Ghost);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-[:{}]->{}", self.start, self.rel_type, self.end)
    }
}
