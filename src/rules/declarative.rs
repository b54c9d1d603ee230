//! YAML-driven rule definitions
//!
//! A rule document maps entity (record) types to node rules and
//! relationship rules:
//!
//! ```yaml
//! entities:
//!   Person:
//!     nodes:
//!       - id: person
//!         labels: [Person]
//!         primary_key: ID
//!         properties:
//!           ID: { field: id, as: int }
//!           name: { field: name }
//!   Friendship:
//!     relationships:
//!       - type: KNOWS
//!         from: { labels: [Person], where: { ID: { field: a, as: int } } }
//!         to: { labels: [Person], where: { ID: { field: b, as: int } } }
//!         merge: true
//! ```
//!
//! Endpoints are either a store lookup (`labels` + `where`) or `node: <id>`,
//! the node that node rule builds from the same record, found again through
//! its primary label and key. Every matched start is joined with every
//! matched end.

use super::{RuleChain, RuleContext, RuleError, RuleSet};
use crate::convert::Phase;
use crate::graph::{Fragment, Node, PrimaryKey, Properties, PropertyValue, Relationship};
use crate::resource::Record;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Target type of a field conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conversion {
    Int,
    Float,
    String,
    Bool,
}

impl Conversion {
    fn name(self) -> &'static str {
        match self {
            Conversion::Int => "int",
            Conversion::Float => "float",
            Conversion::String => "string",
            Conversion::Bool => "bool",
        }
    }

    fn apply(self, field: &str, value: &PropertyValue) -> Result<PropertyValue, RuleError> {
        if value.is_null() {
            return Ok(PropertyValue::Null);
        }
        let converted = match (self, value) {
            (Conversion::Int, PropertyValue::Int(i)) => Some(PropertyValue::Int(*i)),
            (Conversion::Int, PropertyValue::Float(x)) => Some(PropertyValue::Int(x.trunc() as i64)),
            (Conversion::Int, PropertyValue::Bool(b)) => Some(PropertyValue::Int(i64::from(*b))),
            (Conversion::Int, PropertyValue::String(s)) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|x| x.trunc() as i64))
                    .map(PropertyValue::Int)
            }
            (Conversion::Float, PropertyValue::Int(i)) => Some(PropertyValue::Float(*i as f64)),
            (Conversion::Float, PropertyValue::Float(x)) => Some(PropertyValue::Float(*x)),
            (Conversion::Float, PropertyValue::String(s)) => {
                s.trim().parse::<f64>().ok().map(PropertyValue::Float)
            }
            (Conversion::String, PropertyValue::String(s)) => Some(PropertyValue::String(s.clone())),
            (Conversion::String, other) => Some(PropertyValue::String(other.to_string())),
            (Conversion::Bool, PropertyValue::Bool(b)) => Some(PropertyValue::Bool(*b)),
            (Conversion::Bool, PropertyValue::Int(i)) => Some(PropertyValue::Bool(*i != 0)),
            (Conversion::Bool, PropertyValue::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(PropertyValue::Bool(true)),
                "false" | "no" | "0" => Some(PropertyValue::Bool(false)),
                _ => None,
            },
            _ => None,
        };
        converted.ok_or_else(|| RuleError::Conversion {
            field: field.to_string(),
            value: value.to_string(),
            target: self.name(),
        })
    }
}

/// Where a property value comes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    /// Read from the record, optionally converted. A missing field reads as null.
    Field {
        field: String,
        #[serde(default, rename = "as")]
        conversion: Option<Conversion>,
    },
    /// Fixed value
    Static { value: PropertyValue },
}

impl ValueSpec {
    fn evaluate(&self, record: &Record) -> Result<PropertyValue, RuleError> {
        match self {
            ValueSpec::Field { field, conversion } => {
                let raw = record.get(field).cloned().unwrap_or(PropertyValue::Null);
                match conversion {
                    Some(c) => c.apply(field, &raw),
                    None => Ok(raw),
                }
            }
            ValueSpec::Static { value } => Ok(value.clone()),
        }
    }
}

fn evaluate_all(specs: &BTreeMap<String, ValueSpec>, record: &Record) -> Result<Properties, RuleError> {
    let mut properties = Properties::new();
    for (key, spec) in specs {
        let value = spec.evaluate(record)?;
        if !value.is_null() {
            properties.insert(key.clone(), value);
        }
    }
    Ok(properties)
}

/// Builds one node per record
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeRule {
    pub id: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, ValueSpec>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub primary_label: Option<String>,
}

impl NodeRule {
    fn build(&self, record: &Record) -> Result<Node, RuleError> {
        let mut node = Node::new(self.labels.iter().cloned());
        node.properties = evaluate_all(&self.properties, record)?;
        node.primary_key = self.primary_key.clone();
        node.primary_label = self.primary_label.clone();
        Ok(node)
    }
}

/// One side of a relationship rule
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EndpointSpec {
    /// The node built by the node rule with this id
    Node { node: String },
    /// Committed nodes with all `labels` and matching `where`
    Lookup {
        labels: Vec<String>,
        #[serde(default, rename = "where")]
        conditions: BTreeMap<String, ValueSpec>,
    },
}

/// Builds relationships between matched nodes
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationshipRule {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub from: EndpointSpec,
    pub to: EndpointSpec,
    #[serde(default)]
    pub properties: BTreeMap<String, ValueSpec>,
    /// Merge on this property in addition to type and endpoints
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Merge on type and endpoints only
    #[serde(default)]
    pub merge: bool,
    /// Produce nothing instead of failing when an endpoint matches no node
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityRules {
    #[serde(default)]
    pub nodes: Vec<NodeRule>,
    #[serde(default)]
    pub relationships: Vec<RelationshipRule>,
}

/// A parsed rule file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDocument {
    pub entities: BTreeMap<String, EntityRules>,
}

impl RuleDocument {
    pub fn from_yaml(text: &str) -> Result<Self, RuleError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Check the document and build the lookup table.
    pub fn compile(self) -> Result<RuleSet, RuleError> {
        let mut rules = RuleSet::new();
        for (entity, spec) in self.entities {
            validate_entity(&entity, &spec)?;

            let by_id: HashMap<String, NodeRule> = spec
                .nodes
                .iter()
                .map(|r| (r.id.clone(), r.clone()))
                .collect();

            if !spec.nodes.is_empty() {
                rules.insert(
                    entity.clone(),
                    Phase::Node,
                    Arc::new(NodeRules { rules: spec.nodes }),
                );
            }
            if !spec.relationships.is_empty() {
                rules.insert(
                    entity.clone(),
                    Phase::Relationship,
                    Arc::new(RelationshipRules {
                        rules: spec.relationships,
                        nodes: by_id,
                    }),
                );
            }
        }
        Ok(rules)
    }
}

/// Parse and compile a YAML rule file.
pub fn load_rules(path: impl AsRef<Path>) -> Result<RuleSet, RuleError> {
    RuleDocument::from_path(path)?.compile()
}

fn validate_entity(entity: &str, spec: &EntityRules) -> Result<(), RuleError> {
    let mut ids = HashSet::new();
    for rule in &spec.nodes {
        if !ids.insert(rule.id.as_str()) {
            return Err(RuleError::Compile(format!(
                "{}: duplicate node rule id '{}'",
                entity, rule.id
            )));
        }
        if rule.labels.is_empty() {
            return Err(RuleError::Compile(format!(
                "{}: node rule '{}' has no labels",
                entity, rule.id
            )));
        }
        if let Some(label) = &rule.primary_label {
            if !rule.labels.contains(label) {
                return Err(RuleError::Compile(format!(
                    "{}: primary label '{}' of node rule '{}' is not one of its labels",
                    entity, label, rule.id
                )));
            }
        }
    }

    for rel in &spec.relationships {
        if rel.merge && rel.primary_key.is_some() {
            return Err(RuleError::Compile(format!(
                "{}: relationship '{}' sets both merge and primary_key",
                entity, rel.rel_type
            )));
        }
        for endpoint in [&rel.from, &rel.to] {
            match endpoint {
                EndpointSpec::Node { node } => {
                    let target = spec.nodes.iter().find(|n| &n.id == node).ok_or_else(|| {
                        RuleError::Compile(format!(
                            "{}: relationship '{}' refers to unknown node rule '{}'",
                            entity, rel.rel_type, node
                        ))
                    })?;
                    if target.primary_key.is_none() {
                        return Err(RuleError::Compile(format!(
                            "{}: node rule '{}' needs a primary_key to be used as an endpoint",
                            entity, node
                        )));
                    }
                }
                EndpointSpec::Lookup { labels, .. } if labels.is_empty() => {
                    return Err(RuleError::Compile(format!(
                        "{}: relationship '{}' has an endpoint without labels",
                        entity, rel.rel_type
                    )));
                }
                EndpointSpec::Lookup { .. } => {}
            }
        }
    }
    Ok(())
}

struct NodeRules {
    rules: Vec<NodeRule>,
}

impl RuleChain for NodeRules {
    fn apply(&self, record: &mut Record, _ctx: &RuleContext<'_>) -> Result<Fragment, RuleError> {
        let mut out = Fragment::new();
        for rule in &self.rules {
            let node = rule.build(record)?;
            record.set_supply(rule.id.clone(), Fragment::from(node.clone()));
            out.push_node(node);
        }
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

struct RelationshipRules {
    rules: Vec<RelationshipRule>,
    nodes: HashMap<String, NodeRule>,
}

impl RelationshipRules {
    fn resolve(&self, endpoint: &EndpointSpec, record: &Record, ctx: &RuleContext<'_>) -> Result<Vec<Node>, RuleError> {
        match endpoint {
            EndpointSpec::Node { node } => {
                let rule = self
                    .nodes
                    .get(node)
                    .ok_or_else(|| RuleError::Compile(format!("unknown node rule '{}'", node)))?;
                let built = rule.build(record)?;
                let (key, value) = built
                    .merge_key()
                    .ok_or_else(|| RuleError::Compile(format!("node rule '{}' has no primary key", node)))?;
                let label = built.merge_label().unwrap_or_default().to_string();
                let conditions = Properties::from([(key.to_string(), value)]);
                ctx.matcher().match_nodes(&[label], &conditions)
            }
            EndpointSpec::Lookup { labels, conditions } => {
                let mut evaluated = Properties::new();
                for (key, spec) in conditions {
                    evaluated.insert(key.clone(), spec.evaluate(record)?);
                }
                ctx.matcher().match_nodes(labels, &evaluated)
            }
        }
    }
}

fn describe(endpoint: &EndpointSpec, record: &Record) -> String {
    match endpoint {
        EndpointSpec::Node { node } => format!("node rule '{}' for {}", node, record),
        EndpointSpec::Lookup { labels, conditions } => {
            let mut parts = Vec::new();
            for (key, spec) in conditions {
                let value = spec
                    .evaluate(record)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|_| "?".into());
                parts.push(format!("{}: {}", key, value));
            }
            format!("(:{} {{{}}})", labels.join(":"), parts.join(", "))
        }
    }
}

impl RuleChain for RelationshipRules {
    fn apply(&self, record: &mut Record, ctx: &RuleContext<'_>) -> Result<Fragment, RuleError> {
        let mut out = Fragment::new();
        for rule in &self.rules {
            let starts = self.resolve(&rule.from, record, ctx)?;
            let ends = self.resolve(&rule.to, record, ctx)?;
            if starts.is_empty() || ends.is_empty() {
                if rule.optional {
                    continue;
                }
                let missing = if starts.is_empty() { &rule.from } else { &rule.to };
                return Err(RuleError::NoMatch(describe(missing, record)));
            }

            let properties = evaluate_all(&rule.properties, record)?;
            let key = if rule.merge {
                Some(PrimaryKey::Ghost)
            } else {
                rule.primary_key.clone().map(PrimaryKey::Property)
            };

            for start in &starts {
                for end in &ends {
                    let mut rel = Relationship::new(start.clone(), rule.rel_type.clone(), end.clone());
                    rel.properties = properties.clone();
                    rel.primary_key = key.clone();
                    out.push_relationship(rel);
                }
            }
        }
        Ok(out)
    }

    fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::GlobalState;
    use crate::storage::{GraphStore, MemoryGraph};

    const PEOPLE: &str = r#"
entities:
  Person:
    nodes:
      - id: person
        labels: [Person]
        primary_key: ID
        properties:
          ID: { field: id, as: int }
          name: { field: name }
          source: { value: crm }
    relationships:
      - type: MANAGED_BY
        from: { node: person }
        to: { labels: [Person], where: { ID: { field: manager, as: int } } }
        optional: true
  Friendship:
    relationships:
      - type: KNOWS
        from: { labels: [Person], where: { ID: { field: a } } }
        to: { labels: [Person], where: { ID: { field: b } } }
        merge: true
"#;

    fn ctx<'a>(phase: Phase, store: &'a MemoryGraph, global: &'a GlobalState) -> RuleContext<'a> {
        RuleContext::new(phase, store, global)
    }

    #[test]
    fn compiles_masks_per_phase() {
        let rules = RuleDocument::from_yaml(PEOPLE).unwrap().compile().unwrap();

        assert!(rules.type_mask(Phase::Node).contains("Person"));
        assert!(!rules.type_mask(Phase::Node).contains("Friendship"));
        assert!(rules.type_mask(Phase::Relationship).contains("Friendship"));
        assert!(rules.type_mask(Phase::Relationship).contains("Person"));
    }

    #[test]
    fn node_rules_convert_fields() {
        let rules = RuleDocument::from_yaml(PEOPLE).unwrap().compile().unwrap();
        let store = MemoryGraph::new();
        let global = GlobalState::new();
        let mut record = Record::new("Person").with_field("id", "7").with_field("name", "Grace");

        let fragment = rules.apply(Phase::Node, &mut record, &ctx(Phase::Node, &store, &global)).unwrap();

        let node = &fragment.nodes[0];
        assert_eq!(node.get("ID"), Some(&PropertyValue::Int(7)));
        assert_eq!(node.get("source"), Some(&PropertyValue::String("crm".into())));
        assert_eq!(node.primary_key.as_deref(), Some("ID"));
        assert!(record.supply("person").is_some());
    }

    #[test]
    fn unconvertible_field_is_an_error() {
        let rules = RuleDocument::from_yaml(PEOPLE).unwrap().compile().unwrap();
        let store = MemoryGraph::new();
        let global = GlobalState::new();
        let mut record = Record::new("Person").with_field("id", "seven");

        let err = rules
            .apply(Phase::Node, &mut record, &ctx(Phase::Node, &store, &global))
            .unwrap_err();
        assert!(matches!(err, RuleError::Conversion { target: "int", .. }));
    }

    #[test]
    fn relationships_join_committed_nodes() {
        let rules = RuleDocument::from_yaml(PEOPLE).unwrap().compile().unwrap();
        let store = MemoryGraph::new();
        let global = GlobalState::new();
        for id in [1i64, 2] {
            let mut record = Record::new("Person").with_field("id", id);
            let mut fragment = rules.apply(Phase::Node, &mut record, &ctx(Phase::Node, &store, &global)).unwrap();
            store.merge(&mut fragment).unwrap();
        }

        let rel_ctx = ctx(Phase::Relationship, &store, &global);
        let mut friendship = Record::new("Friendship").with_field("a", 1i64).with_field("b", 2i64);
        let fragment = rules.apply(Phase::Relationship, &mut friendship, &rel_ctx).unwrap();
        assert_eq!(fragment.relationships.len(), 1);
        assert_eq!(fragment.relationships[0].primary_key, Some(PrimaryKey::Ghost));

        let mut managed = Record::new("Person").with_field("id", 2i64).with_field("manager", 1i64);
        let fragment = rules.apply(Phase::Relationship, &mut managed, &rel_ctx).unwrap();
        assert_eq!(fragment.relationships.len(), 1);
        assert_eq!(fragment.relationships[0].start.get("ID"), Some(&PropertyValue::Int(2)));

        // optional rule with no manager yields nothing
        let mut unmanaged = Record::new("Person").with_field("id", 1i64);
        assert!(rules.apply(Phase::Relationship, &mut unmanaged, &rel_ctx).unwrap().is_empty());
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        let rules = RuleDocument::from_yaml(PEOPLE).unwrap().compile().unwrap();
        let store = MemoryGraph::new();
        let global = GlobalState::new();
        let mut friendship = Record::new("Friendship").with_field("a", 1i64).with_field("b", 2i64);

        let err = rules
            .apply(Phase::Relationship, &mut friendship, &ctx(Phase::Relationship, &store, &global))
            .unwrap_err();
        assert!(matches!(err, RuleError::NoMatch(_)));
    }

    #[test]
    fn duplicate_node_ids_do_not_compile() {
        let yaml = r#"
entities:
  Person:
    nodes:
      - { id: p, labels: [Person] }
      - { id: p, labels: [Human] }
"#;
        let err = RuleDocument::from_yaml(yaml).unwrap().compile().unwrap_err();
        assert!(matches!(err, RuleError::Compile(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn node_endpoint_requires_primary_key() {
        let yaml = r#"
entities:
  Person:
    nodes:
      - { id: p, labels: [Person] }
    relationships:
      - type: SELF
        from: { node: p }
        to: { node: p }
"#;
        let err = RuleDocument::from_yaml(yaml).unwrap().compile().unwrap_err();
        assert!(matches!(err, RuleError::Compile(msg) if msg.contains("primary_key")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "entities:\n  Person:\n    nodez: []\n";
        assert!(matches!(RuleDocument::from_yaml(yaml), Err(RuleError::Yaml(_))));
    }
}
