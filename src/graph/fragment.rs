//! Graph fragments: what one rule chain produces for one record

use super::node::{Node, NodeHandle, PropertyValue};
use super::relationship::Relationship;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A free-standing key/value produced by an attribute rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: PropertyValue,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A set of nodes, relationships and attributes.
///
/// Nodes are unique by handle; adding a node whose handle is already
/// present is a no-op. Relationships are kept as given, so two equal
/// relationships stay two relationships.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fragment {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
    pub attributes: Vec<Attribute>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.push_node(node);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add a node unless one with the same handle is already present.
    pub fn push_node(&mut self, node: Node) {
        if !self.nodes.iter().any(|n| n.handle == node.handle) {
            self.nodes.push(node);
        }
    }

    pub fn push_relationship(&mut self, relationship: Relationship) {
        self.relationships.push(relationship);
    }

    /// Union `other` into `self`.
    pub fn union(&mut self, other: Fragment) {
        if self.nodes.is_empty() {
            self.nodes = other.nodes;
        } else {
            let mut seen: HashSet<NodeHandle> = self.nodes.iter().map(|n| n.handle).collect();
            for node in other.nodes {
                if seen.insert(node.handle) {
                    self.nodes.push(node);
                }
            }
        }
        self.relationships.extend(other.relationships);
        self.attributes.extend(other.attributes);
    }

    pub fn node(&self, handle: &NodeHandle) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.handle == handle)
    }

    /// Number of graph elements (nodes + relationships)
    pub fn len(&self) -> usize {
        self.nodes.len() + self.relationships.len()
    }

    /// True if the fragment holds no nodes and no relationships.
    /// Attributes alone do not make a fragment committable.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.relationships.clear();
        self.attributes.clear();
    }
}

impl From<Node> for Fragment {
    fn from(node: Node) -> Self {
        Fragment::new().with_node(node)
    }
}

impl From<Relationship> for Fragment {
    fn from(relationship: Relationship) -> Self {
        Fragment::new().with_relationship(relationship)
    }
}
