//! Building blocks for rule chains

use super::{RuleChain, RuleContext, RuleError};
use crate::graph::{Fragment, PrimaryKey};
use crate::resource::Record;
use std::sync::Arc;

/// Chain that never produces anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyChain;

impl RuleChain for EmptyChain {
    fn apply(&self, _record: &mut Record, _ctx: &RuleContext<'_>) -> Result<Fragment, RuleError> {
        Ok(Fragment::new())
    }

    fn is_empty(&self) -> bool {
        true
    }
}

/// Closure-backed hook.
pub struct FnChain<F> {
    f: F,
}

impl<F> FnChain<F>
where
    F: Fn(&mut Record, &RuleContext<'_>) -> Result<Fragment, RuleError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> RuleChain for FnChain<F>
where
    F: Fn(&mut Record, &RuleContext<'_>) -> Result<Fragment, RuleError> + Send + Sync,
{
    fn apply(&self, record: &mut Record, ctx: &RuleContext<'_>) -> Result<Fragment, RuleError> {
        (self.f)(record, ctx)
    }
}

struct Step {
    id: Option<String>,
    chain: Arc<dyn RuleChain>,
}

/// Runs chains in order and unions their fragments.
///
/// A named step stashes its fragment into the record's supplies under its
/// name, so later steps can build on what it produced.
#[derive(Default)]
pub struct ChainSeq {
    steps: Vec<Step>,
}

impl ChainSeq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, chain: impl RuleChain + 'static) -> Self {
        self.steps.push(Step {
            id: None,
            chain: Arc::new(chain),
        });
        self
    }

    pub fn then_named(mut self, id: impl Into<String>, chain: impl RuleChain + 'static) -> Self {
        self.steps.push(Step {
            id: Some(id.into()),
            chain: Arc::new(chain),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

impl RuleChain for ChainSeq {
    fn apply(&self, record: &mut Record, ctx: &RuleContext<'_>) -> Result<Fragment, RuleError> {
        let mut out = Fragment::new();
        for step in &self.steps {
            let fragment = step.chain.apply(record, ctx)?;
            if let Some(id) = &step.id {
                record.set_supply(id.clone(), fragment.clone());
            }
            out.union(fragment);
        }
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.steps.iter().all(|s| s.chain.is_empty())
    }
}

/// Dedup hook: every relationship the wrapped chain yields gets the ghost
/// key, so the store keeps at most one per type and endpoints.
pub struct MergeRelationships<C> {
    inner: C,
}

impl<C: RuleChain> MergeRelationships<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: RuleChain> RuleChain for MergeRelationships<C> {
    fn apply(&self, record: &mut Record, ctx: &RuleContext<'_>) -> Result<Fragment, RuleError> {
        let mut fragment = self.inner.apply(record, ctx)?;
        for rel in &mut fragment.relationships {
            rel.primary_key = Some(PrimaryKey::Ghost);
        }
        Ok(fragment)
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Phase;
    use crate::graph::{Node, Relationship};
    use crate::rules::GlobalState;
    use crate::storage::MemoryGraph;

    #[test]
    fn named_steps_feed_later_steps() {
        let seq = ChainSeq::new()
            .then_named(
                "person",
                FnChain::new(|record: &mut Record, _: &RuleContext<'_>| {
                    let id = record.get("id").cloned().unwrap_or(crate::graph::PropertyValue::Null);
                    Ok(Fragment::from(Node::new(["Person"]).with_property("ID", id)))
                }),
            )
            .then(FnChain::new(|record: &mut Record, _: &RuleContext<'_>| {
                let person = record
                    .supply("person")
                    .and_then(|f| f.nodes.first().cloned())
                    .ok_or_else(|| RuleError::Hook("person step did not run".into()))?;
                let account = Node::new(["Account"]);
                Ok(Fragment::new()
                    .with_node(account.clone())
                    .with_relationship(Relationship::new(person, "OWNS", account)))
            }));

        let store = MemoryGraph::new();
        let global = GlobalState::new();
        let ctx = RuleContext::new(Phase::Node, &store, &global);
        let mut record = Record::new("Person").with_field("id", 3i64);

        let fragment = seq.apply(&mut record, &ctx).unwrap();

        // Person is shared by handle between the two steps
        assert_eq!(fragment.nodes.len(), 2);
        assert_eq!(fragment.relationships.len(), 1);
        assert!(record.supply("person").is_some());
    }

    #[test]
    fn merge_relationships_attaches_ghost_key() {
        let chain = MergeRelationships::new(FnChain::new(|_: &mut Record, _: &RuleContext<'_>| {
            let a = Node::new(["A"]);
            let b = Node::new(["B"]);
            Ok(Fragment::from(Relationship::new(a, "LINKS", b)))
        }));

        let store = MemoryGraph::new();
        let global = GlobalState::new();
        let ctx = RuleContext::new(Phase::Relationship, &store, &global);
        let fragment = chain.apply(&mut Record::new("Link"), &ctx).unwrap();

        assert_eq!(fragment.relationships[0].primary_key, Some(PrimaryKey::Ghost));
    }

    #[test]
    fn empty_sequences_are_empty() {
        assert!(ChainSeq::new().is_empty());
        assert!(ChainSeq::new().then(EmptyChain).is_empty());
        assert!(MergeRelationships::new(EmptyChain).is_empty());
    }
}
