//! Lookup table from record type to rule chains

use super::{EmptyChain, RuleChain, RuleContext, RuleError};
use crate::convert::Phase;
use crate::graph::Fragment;
use crate::resource::Record;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Record types whose chain for a phase can produce something.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMask {
    types: HashSet<String>,
}

impl TypeMask {
    pub fn contains(&self, record_type: &str) -> bool {
        self.types.contains(record_type)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[derive(Clone)]
struct Entry {
    nodes: Arc<dyn RuleChain>,
    relationships: Arc<dyn RuleChain>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            nodes: Arc::new(EmptyChain),
            relationships: Arc::new(EmptyChain),
        }
    }
}

/// Pair of rule chains per record type, built once before a run.
#[derive(Clone, Default)]
pub struct RuleSet {
    entries: HashMap<String, Entry>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_rules(mut self, record_type: impl Into<String>, chain: impl RuleChain + 'static) -> Self {
        self.insert(record_type, Phase::Node, Arc::new(chain));
        self
    }

    pub fn with_relationship_rules(
        mut self,
        record_type: impl Into<String>,
        chain: impl RuleChain + 'static,
    ) -> Self {
        self.insert(record_type, Phase::Relationship, Arc::new(chain));
        self
    }

    /// Install `chain` for `record_type` in `phase`, replacing any previous one.
    pub fn insert(&mut self, record_type: impl Into<String>, phase: Phase, chain: Arc<dyn RuleChain>) {
        let entry = self.entries.entry(record_type.into()).or_default();
        match phase {
            Phase::Node => entry.nodes = chain,
            Phase::Relationship => entry.relationships = chain,
        }
    }

    /// The chain for `record_type` in `phase`, if the type is known
    pub fn rules_for(&self, record_type: &str, phase: Phase) -> Option<&Arc<dyn RuleChain>> {
        self.entries.get(record_type).map(|entry| match phase {
            Phase::Node => &entry.nodes,
            Phase::Relationship => &entry.relationships,
        })
    }

    pub fn type_mask(&self, phase: Phase) -> TypeMask {
        let types = self
            .entries
            .keys()
            .filter(|t| self.rules_for(t, phase).is_some_and(|chain| !chain.is_empty()))
            .cloned()
            .collect();
        TypeMask { types }
    }

    pub fn record_types(&self) -> BTreeSet<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Run the chain for the record's type; unknown types yield an empty fragment.
    pub fn apply(&self, phase: Phase, record: &mut Record, ctx: &RuleContext<'_>) -> Result<Fragment, RuleError> {
        match self.rules_for(record.record_type(), phase) {
            Some(chain) => chain.apply(record, ctx),
            None => Ok(Fragment::new()),
        }
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("record_types", &self.record_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::rules::{FnChain, GlobalState};
    use crate::storage::MemoryGraph;

    fn person_chain() -> FnChain<impl Fn(&mut Record, &RuleContext<'_>) -> Result<Fragment, RuleError> + Send + Sync> {
        FnChain::new(|record: &mut Record, _: &RuleContext<'_>| {
            let id = record.get("id").cloned().ok_or_else(|| RuleError::MissingField("id".into()))?;
            Ok(Fragment::from(Node::new(["Person"]).with_property("ID", id)))
        })
    }

    #[test]
    fn type_mask_skips_empty_chains() {
        let rules = RuleSet::new()
            .with_node_rules("Person", person_chain())
            .with_relationship_rules("Friendship", person_chain());

        let nodes = rules.type_mask(Phase::Node);
        assert!(nodes.contains("Person"));
        assert!(!nodes.contains("Friendship"));

        let rels = rules.type_mask(Phase::Relationship);
        assert!(rels.contains("Friendship"));
        assert!(!rels.contains("Person"));
    }

    #[test]
    fn apply_dispatches_on_record_type() {
        let rules = RuleSet::new().with_node_rules("Person", person_chain());
        let store = MemoryGraph::new();
        let global = GlobalState::new();
        let ctx = RuleContext::new(Phase::Node, &store, &global);

        let mut person = Record::new("Person").with_field("id", 1i64);
        assert_eq!(rules.apply(Phase::Node, &mut person, &ctx).unwrap().nodes.len(), 1);

        let mut other = Record::new("Invoice").with_field("id", 1i64);
        assert!(rules.apply(Phase::Node, &mut other, &ctx).unwrap().is_empty());

        let mut broken = Record::new("Person");
        assert!(matches!(
            rules.apply(Phase::Node, &mut broken, &ctx),
            Err(RuleError::MissingField(_))
        ));
    }
}
