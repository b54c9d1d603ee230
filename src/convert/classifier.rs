//! Routing of graph elements into the create or merge path

use crate::graph::{Fragment, Node, NodeHandle, Relationship};
use std::collections::HashSet;

/// Commit path of a graph element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Blind insert
    Create,
    /// Idempotent upsert on the primary key
    Merge,
}

pub fn classify_node(node: &Node) -> Bucket {
    if node.primary_key.is_some() {
        Bucket::Merge
    } else {
        Bucket::Create
    }
}

/// The ghost key counts as a key.
pub fn classify_relationship(relationship: &Relationship) -> Bucket {
    if relationship.primary_key.is_some() {
        Bucket::Merge
    } else {
        Bucket::Create
    }
}

#[derive(Debug, Default)]
struct Side {
    fragment: Fragment,
    handles: HashSet<NodeHandle>,
}

impl Side {
    fn push_node(&mut self, node: Node) {
        if self.handles.insert(node.handle) {
            self.fragment.nodes.push(node);
        }
    }
}

/// A worker's local, not yet committed elements.
///
/// Also tracks how many records fed the buffer so counters can be
/// advanced once the buffer is committed.
#[derive(Debug, Default)]
pub struct CommitBuffer {
    create: Side,
    merge: Side,
    records: usize,
}

impl CommitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every element of `fragment` into the buffer. Attributes are
    /// not graph elements and are dropped.
    pub fn add(&mut self, fragment: Fragment) {
        for node in fragment.nodes {
            match classify_node(&node) {
                Bucket::Create => self.create.push_node(node),
                Bucket::Merge => self.merge.push_node(node),
            }
        }
        for rel in fragment.relationships {
            match classify_relationship(&rel) {
                Bucket::Create => self.create.fragment.relationships.push(rel),
                Bucket::Merge => self.merge.fragment.relationships.push(rel),
            }
        }
    }

    pub fn add_records(&mut self, count: usize) {
        self.records += count;
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Buffered graph elements across both buckets
    pub fn len(&self) -> usize {
        self.create.fragment.len() + self.merge.fragment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.records == 0
    }

    pub fn create(&self) -> &Fragment {
        &self.create.fragment
    }

    pub fn merge(&self) -> &Fragment {
        &self.merge.fragment
    }

    /// Take the `(create, merge, records)` contents, leaving the buffer empty.
    pub fn take(&mut self) -> (Fragment, Fragment, usize) {
        let taken = std::mem::take(self);
        (taken.create.fragment, taken.merge.fragment, taken.records)
    }
}
