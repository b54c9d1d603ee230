//! Records and rules for a small social graph
//!
//! `Person` records become `:Person {ID}` nodes merged on `ID`.
//! `Friendship` records connect two existing people with `KNOWS`, looked
//! up through the store. `Like` records connect them with `LIKES`.

#![allow(dead_code)]

use rowgraph::rules::MergeRelationships;
use rowgraph::{
    FnChain, Fragment, Node, Properties, PropertyValue, Record, Relationship, RetryPolicy, RuleChain, RuleContext,
    RuleError, RuleSet,
};
use std::time::Duration;

pub const KNOWS: &str = "KNOWS";
pub const LIKES: &str = "LIKES";

pub fn person(id: i64) -> Record {
    Record::new("Person")
        .with_field("id", id)
        .with_field("name", format!("person-{}", id))
        .with_identifying(["id"])
}

pub fn people(ids: &[i64]) -> Vec<Record> {
    ids.iter().map(|id| person(*id)).collect()
}

pub fn friendship(a: i64, b: i64) -> Record {
    Record::new("Friendship")
        .with_field("a", a)
        .with_field("b", b)
        .with_identifying(["a", "b"])
}

pub fn friendships(pairs: &[(i64, i64)]) -> Vec<Record> {
    pairs.iter().map(|(a, b)| friendship(*a, *b)).collect()
}

pub fn like(from: i64, to: i64) -> Record {
    Record::new("Like")
        .with_field("from", from)
        .with_field("to", to)
        .with_identifying(["from", "to"])
}

/// Two attempts, millisecond backoff
pub fn quick_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(5))
}

fn field(record: &Record, key: &str) -> Result<i64, RuleError> {
    record
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| RuleError::MissingField(key.to_string()))
}

/// The one person node with `ID = id`, or `NoMatch`.
fn lookup_person(ctx: &RuleContext<'_>, id: i64) -> Result<Node, RuleError> {
    let conditions: Properties = [("ID".to_string(), PropertyValue::Int(id))].into_iter().collect();
    ctx.matcher()
        .match_nodes(&["Person".to_string()], &conditions)?
        .into_iter()
        .next()
        .ok_or_else(|| RuleError::NoMatch(format!(":Person(ID={})", id)))
}

fn person_chain() -> impl RuleChain {
    FnChain::new(|record: &mut Record, _: &RuleContext<'_>| {
        let id = field(record, "id")?;
        let mut node = Node::new(["Person"]).with_property("ID", id).with_primary_key("ID");
        if let Some(name) = record.get("name") {
            node = node.with_property("name", name.clone());
        }
        Ok(Fragment::from(node))
    })
}

fn edge_chain(rel_type: &'static str, from: &'static str, to: &'static str) -> impl RuleChain {
    FnChain::new(move |record: &mut Record, ctx: &RuleContext<'_>| {
        let start = lookup_person(ctx, field(record, from)?)?;
        let end = lookup_person(ctx, field(record, to)?)?;
        Ok(Fragment::from(Relationship::new(start, rel_type, end)))
    })
}

/// Rules for `Person`, `Friendship` and `Like`. With `dedup_likes` the
/// `LIKES` edges get the ghost key and collapse onto one per pair.
pub fn social_rules(dedup_likes: bool) -> RuleSet {
    let rules = RuleSet::new()
        .with_node_rules("Person", person_chain())
        .with_relationship_rules("Friendship", edge_chain(KNOWS, "a", "b"));
    if dedup_likes {
        rules.with_relationship_rules("Like", MergeRelationships::new(edge_chain(LIKES, "from", "to")))
    } else {
        rules.with_relationship_rules("Like", edge_chain(LIKES, "from", "to"))
    }
}
