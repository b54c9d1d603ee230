//! State shared by every worker of a run

use super::batcher::Batcher;
use super::retry::RetryPolicy;
use super::{CancellationToken, Phase};
use crate::rules::{GlobalState, RuleSet, TypeMask};
use crate::storage::GraphStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Snapshot of a run's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub resources_seen: u64,
    pub nodes_committed: u64,
    pub relationships_committed: u64,
}

/// Monotonic counters of one run, across both phases.
#[derive(Debug, Default)]
pub struct RunCounters {
    resources_seen: AtomicU64,
    nodes_committed: AtomicU64,
    relationships_committed: AtomicU64,
    processed: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful commit.
    pub fn add_committed(&self, records: u64, nodes: u64, relationships: u64) {
        self.resources_seen.fetch_add(records, Ordering::SeqCst);
        self.nodes_committed.fetch_add(nodes, Ordering::SeqCst);
        self.relationships_committed.fetch_add(relationships, Ordering::SeqCst);
    }

    pub fn resources_seen(&self) -> u64 {
        self.resources_seen.load(Ordering::SeqCst)
    }

    /// Count one processed record and return the running total.
    fn record_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            resources_seen: self.resources_seen.load(Ordering::SeqCst),
            nodes_committed: self.nodes_committed.load(Ordering::SeqCst),
            relationships_committed: self.relationships_committed.load(Ordering::SeqCst),
        }
    }
}

/// Delivered once per processed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    /// Records processed so far in this run, both phases together
    pub records_seen: u64,
    /// Expected records for the whole run, when the source knows its length
    pub total_hint: Option<u64>,
}

pub type ProgressFn = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Everything a worker needs, passed by handle at spawn time.
///
/// One context per phase; counters and global state outlive it and are
/// shared with the next phase.
pub struct RunContext {
    pub(crate) phase: Phase,
    pub(crate) rules: Arc<RuleSet>,
    pub(crate) mask: TypeMask,
    pub(crate) store: Arc<dyn GraphStore>,
    pub(crate) global: GlobalState,
    pub(crate) counters: Arc<RunCounters>,
    pub(crate) batcher: Batcher,
    pub(crate) retry: RetryPolicy,
    progress: Option<ProgressFn>,
    total_hint: Option<u64>,
    batch_size: usize,
    adaptive: bool,
    flush_size: AtomicUsize,
    merge_lock: Mutex<()>,
    stop: CancellationToken,
    cancel: CancellationToken,
}

pub(crate) struct RunContextParts {
    pub phase: Phase,
    pub rules: Arc<RuleSet>,
    pub store: Arc<dyn GraphStore>,
    pub global: GlobalState,
    pub counters: Arc<RunCounters>,
    pub batcher: Batcher,
    pub retry: RetryPolicy,
    pub progress: Option<ProgressFn>,
    pub total_hint: Option<u64>,
    pub batch_size: usize,
    pub flush_size: usize,
    pub adaptive: bool,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub(crate) fn new(parts: RunContextParts) -> Self {
        let mask = parts.rules.type_mask(parts.phase);
        Self {
            phase: parts.phase,
            rules: parts.rules,
            mask,
            store: parts.store,
            global: parts.global,
            counters: parts.counters,
            batcher: parts.batcher,
            retry: parts.retry,
            progress: parts.progress,
            total_hint: parts.total_hint,
            batch_size: parts.batch_size.max(1),
            adaptive: parts.adaptive,
            flush_size: AtomicUsize::new(parts.flush_size.max(1)),
            merge_lock: Mutex::new(()),
            stop: CancellationToken::new(),
            cancel: parts.cancel,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    /// Ask every worker to stop at its next check.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn should_stop(&self) -> bool {
        self.stop.is_cancelled() || self.cancel.is_cancelled()
    }

    /// Token tripped by `stop()`
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn flush_size(&self) -> usize {
        self.flush_size.load(Ordering::SeqCst)
    }

    pub fn set_flush_size(&self, size: usize) {
        self.flush_size.store(size.max(1), Ordering::SeqCst);
    }

    /// Records per batch pulled from the batcher. The controller's flush
    /// size doubles as the group size while it is active.
    pub fn group_size(&self) -> usize {
        if self.adaptive {
            self.flush_size()
        } else {
            self.batch_size
        }
    }

    /// The single run-wide serialisation point for merge-class writes.
    pub fn merge_lock(&self) -> MutexGuard<'_, ()> {
        self.merge_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn record_processed(&self) {
        let seen = self.counters.record_processed();
        if let Some(progress) = &self.progress {
            progress(&Progress {
                phase: self.phase,
                records_seen: seen,
                total_hint: self.total_hint,
            });
        }
    }
}
