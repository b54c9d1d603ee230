//! Fault injection around a real store

#![allow(dead_code)]

use rowgraph::{Fragment, GraphStore, MemoryGraph, Node, Properties, PropertyValue, StorageError, StorageResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps a `MemoryGraph` and fails selected writes before they reach it.
///
/// - the first `transient_failures` write calls fail with `Transient`
/// - every write carrying a node whose `ID` equals `poison` fails, always
#[derive(Default)]
pub struct FlakyStore {
    inner: Arc<MemoryGraph>,
    transient_failures: AtomicUsize,
    poison: Option<i64>,
    writes: AtomicUsize,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryGraph>) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn failing_first(mut self, calls: usize) -> Self {
        self.transient_failures = AtomicUsize::new(calls);
        self
    }

    pub fn poisoned(mut self, id: i64) -> Self {
        self.poison = Some(id);
        self
    }

    /// Write calls seen, failed ones included
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self, fragment: &Fragment) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Transient("injected".into()));
        }
        if let Some(id) = self.poison {
            if fragment.nodes.iter().any(|n| n.get("ID") == Some(&PropertyValue::Int(id))) {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(StorageError::Transient(format!("injected failure on ID={}", id)));
            }
        }
        Ok(())
    }
}

impl GraphStore for FlakyStore {
    fn create(&self, fragment: &mut Fragment) -> StorageResult<()> {
        self.check(fragment)?;
        self.inner.create(fragment)
    }

    fn merge(&self, fragment: &mut Fragment) -> StorageResult<()> {
        self.check(fragment)?;
        self.inner.merge(fragment)
    }

    fn match_nodes(&self, labels: &[String], conditions: &Properties) -> StorageResult<Vec<Node>> {
        self.inner.match_nodes(labels, conditions)
    }

    fn node_count(&self, label: Option<&str>) -> StorageResult<usize> {
        self.inner.node_count(label)
    }

    fn relationship_count(&self, rel_type: Option<&str>) -> StorageResult<usize> {
        self.inner.relationship_count(rel_type)
    }
}
