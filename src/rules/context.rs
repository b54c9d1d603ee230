//! What a rule chain can see while it runs

use super::{GlobalState, RuleError};
use crate::convert::Phase;
use crate::graph::{Node, Properties};
use crate::storage::GraphStore;

/// Read-only lookup of committed nodes.
#[derive(Clone, Copy)]
pub struct NodeMatcher<'a> {
    store: &'a dyn GraphStore,
}

impl<'a> NodeMatcher<'a> {
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self { store }
    }

    /// Committed nodes carrying all `labels` and equal on every condition.
    pub fn match_nodes(&self, labels: &[String], conditions: &Properties) -> Result<Vec<Node>, RuleError> {
        Ok(self.store.match_nodes(labels, conditions)?)
    }
}

/// Per-call context handed to `RuleChain::apply`
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    phase: Phase,
    matcher: NodeMatcher<'a>,
    global: &'a GlobalState,
}

impl<'a> RuleContext<'a> {
    pub fn new(phase: Phase, store: &'a dyn GraphStore, global: &'a GlobalState) -> Self {
        Self {
            phase,
            matcher: NodeMatcher::new(store),
            global,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn matcher(&self) -> NodeMatcher<'a> {
        self.matcher
    }

    /// Caller-registered run-wide state
    pub fn global(&self) -> &'a GlobalState {
        self.global
    }
}
