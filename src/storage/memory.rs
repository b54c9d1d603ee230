//! In-process graph store

use super::traits::{conditions_match, property_matches, GraphStore, StorageError, StorageResult};
use crate::graph::{
    Fragment, Node, NodeHandle, NodeId, PrimaryKey, Properties, PropertyValue, Relationship,
    RelationshipId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredNode {
    handle: NodeHandle,
    labels: BTreeSet<String>,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct StoredRelationship {
    rel_type: String,
    start: NodeId,
    end: NodeId,
    properties: Properties,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, StoredNode>,
    relationships: BTreeMap<RelationshipId, StoredRelationship>,
    handles: HashMap<NodeHandle, NodeId>,
    next_node: u64,
    next_relationship: u64,
}

/// Undo log for one write call
#[derive(Default)]
struct Journal {
    inserted_nodes: Vec<NodeId>,
    inserted_relationships: Vec<RelationshipId>,
    replaced_nodes: Vec<(NodeId, StoredNode)>,
    replaced_relationships: Vec<(RelationshipId, StoredRelationship)>,
    handles: Vec<NodeHandle>,
    next_node: u64,
    next_relationship: u64,
}

impl Journal {
    fn begin(state: &GraphState) -> Self {
        Self {
            next_node: state.next_node,
            next_relationship: state.next_relationship,
            ..Default::default()
        }
    }

    fn rollback(self, state: &mut GraphState) {
        // Restore before removing: an entry inserted by this call may also
        // have been replaced by a later merge within it.
        for (id, old) in self.replaced_relationships.into_iter().rev() {
            state.relationships.insert(id, old);
        }
        for id in self.inserted_relationships {
            state.relationships.remove(&id);
        }
        for (id, old) in self.replaced_nodes.into_iter().rev() {
            state.nodes.insert(id, old);
        }
        for id in self.inserted_nodes {
            state.nodes.remove(&id);
        }
        for handle in self.handles {
            state.handles.remove(&handle);
        }
        state.next_node = self.next_node;
        state.next_relationship = self.next_relationship;
    }
}

/// Identities assigned during one call, written back on success
#[derive(Default)]
struct Assignments {
    nodes: HashMap<NodeHandle, NodeId>,
    relationships: Vec<(usize, RelationshipId)>,
}

impl Assignments {
    fn apply(self, fragment: &mut Fragment) {
        for node in &mut fragment.nodes {
            if let Some(id) = self.nodes.get(&node.handle) {
                node.identity = Some(*id);
            }
        }
        for (index, id) in self.relationships {
            let rel = &mut fragment.relationships[index];
            rel.identity = Some(id);
            for endpoint in [&mut rel.start, &mut rel.end] {
                if endpoint.identity.is_none() {
                    endpoint.identity = self.nodes.get(&endpoint.handle).copied();
                }
            }
        }
    }
}

/// In-memory property graph.
///
/// Writes hold a single mutex and are rolled back through an undo journal
/// when any element fails, so a failed call leaves no partial writes.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    state: Mutex<GraphState>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed nodes carrying `label`, in identity order
    pub fn nodes_with_label(&self, label: &str) -> Vec<Node> {
        let state = self.lock();
        state
            .nodes
            .iter()
            .filter(|(_, n)| n.labels.contains(label))
            .map(|(id, n)| to_node(*id, n))
            .collect()
    }

    /// Committed relationships of `rel_type` as `(start, end, properties)`
    pub fn relationships_of_type(&self, rel_type: &str) -> Vec<(NodeId, NodeId, Properties)> {
        let state = self.lock();
        state
            .relationships
            .values()
            .filter(|r| r.rel_type == rel_type)
            .map(|r| (r.start, r.end, r.properties.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        // Every write rolls back before releasing the lock, so a poisoned
        // state is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write<F>(&self, fragment: &mut Fragment, op: F) -> StorageResult<()>
    where
        F: FnOnce(&mut GraphState, &mut Journal, &Fragment) -> StorageResult<Assignments>,
    {
        let mut state = self.lock();
        let mut journal = Journal::begin(&state);
        match op(&mut state, &mut journal, fragment) {
            Ok(assignments) => {
                assignments.apply(fragment);
                Ok(())
            }
            Err(e) => {
                journal.rollback(&mut state);
                Err(e)
            }
        }
    }
}

fn to_node(id: NodeId, stored: &StoredNode) -> Node {
    Node {
        handle: stored.handle,
        identity: Some(id),
        labels: stored.labels.clone(),
        properties: stored.properties.clone(),
        primary_key: None,
        primary_label: None,
    }
}

fn insert_node(state: &mut GraphState, journal: &mut Journal, node: &Node) -> NodeId {
    state.next_node += 1;
    let id = NodeId::from_raw(state.next_node);
    state.nodes.insert(
        id,
        StoredNode {
            handle: node.handle,
            labels: node.labels.clone(),
            properties: node.properties.clone(),
        },
    );
    journal.inserted_nodes.push(id);
    if state.handles.insert(node.handle, id).is_none() {
        journal.handles.push(node.handle);
    }
    id
}

fn merge_node(state: &mut GraphState, journal: &mut Journal, node: &Node) -> StorageResult<NodeId> {
    let (key, value) = match node.merge_key() {
        Some(pair) => pair,
        None => return Ok(insert_node(state, journal, node)),
    };
    let label = node.merge_label().unwrap_or_default().to_string();

    let matches: Vec<NodeId> = state
        .nodes
        .iter()
        .filter(|(_, n)| n.labels.contains(&label) && property_matches(&n.properties, key, &value))
        .map(|(id, _)| *id)
        .collect();

    match matches.as_slice() {
        [] => Ok(insert_node(state, journal, node)),
        [id] => {
            let id = *id;
            if let Some(existing) = state.nodes.get_mut(&id) {
                journal.replaced_nodes.push((id, existing.clone()));
                existing.labels.extend(node.labels.iter().cloned());
                existing
                    .properties
                    .extend(node.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            if state.handles.insert(node.handle, id).is_none() {
                journal.handles.push(node.handle);
            }
            Ok(id)
        }
        many => Err(StorageError::MergeConflict {
            label,
            key: key.to_string(),
            value: value.to_string(),
            matches: many.len(),
        }),
    }
}

fn resolve_endpoint(state: &mut GraphState, journal: &mut Journal, node: &Node) -> StorageResult<NodeId> {
    if let Some(id) = node.identity {
        return if state.nodes.contains_key(&id) {
            Ok(id)
        } else {
            Err(StorageError::MissingEndpoint(format!("{} (identity {})", node, id)))
        };
    }
    if let Some(id) = state.handles.get(&node.handle) {
        return Ok(*id);
    }
    if node.primary_key.is_some() {
        merge_node(state, journal, node)
    } else {
        Ok(insert_node(state, journal, node))
    }
}

fn insert_relationship(
    state: &mut GraphState,
    journal: &mut Journal,
    rel: &Relationship,
    start: NodeId,
    end: NodeId,
) -> RelationshipId {
    state.next_relationship += 1;
    let id = RelationshipId::from_raw(state.next_relationship);
    state.relationships.insert(
        id,
        StoredRelationship {
            rel_type: rel.rel_type.clone(),
            start,
            end,
            properties: rel.properties.clone(),
        },
    );
    journal.inserted_relationships.push(id);
    id
}

fn merge_relationship(
    state: &mut GraphState,
    journal: &mut Journal,
    rel: &Relationship,
    start: NodeId,
    end: NodeId,
) -> StorageResult<RelationshipId> {
    let key = match &rel.primary_key {
        Some(key) => key,
        None => return Ok(insert_relationship(state, journal, rel, start, end)),
    };
    let key_value = match key {
        PrimaryKey::Property(k) => Some((
            k.as_str(),
            rel.properties.get(k).cloned().unwrap_or(PropertyValue::Null),
        )),
        PrimaryKey::Ghost => None,
    };

    let matches: Vec<RelationshipId> = state
        .relationships
        .iter()
        .filter(|(_, r)| r.rel_type == rel.rel_type && r.start == start && r.end == end)
        .filter(|(_, r)| match &key_value {
            Some((k, v)) => property_matches(&r.properties, k, v),
            None => true,
        })
        .map(|(id, _)| *id)
        .collect();

    match matches.as_slice() {
        [] => Ok(insert_relationship(state, journal, rel, start, end)),
        [id] => {
            let id = *id;
            if let Some(existing) = state.relationships.get_mut(&id) {
                journal.replaced_relationships.push((id, existing.clone()));
                existing
                    .properties
                    .extend(rel.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Ok(id)
        }
        many => Err(StorageError::MergeConflict {
            label: rel.rel_type.clone(),
            key: key_value.map(|(k, _)| k.to_string()).unwrap_or_else(|| "<endpoints>".into()),
            value: format!("{}->{}", start, end),
            matches: many.len(),
        }),
    }
}

impl GraphStore for MemoryGraph {
    fn create(&self, fragment: &mut Fragment) -> StorageResult<()> {
        self.write(fragment, |state, journal, fragment| {
            let mut assigned = Assignments::default();
            for node in fragment.nodes.iter().filter(|n| !n.is_committed()) {
                let id = insert_node(state, journal, node);
                assigned.nodes.insert(node.handle, id);
            }
            for (index, rel) in fragment.relationships.iter().enumerate() {
                if rel.identity.is_some() {
                    continue;
                }
                let start = resolve_endpoint(state, journal, &rel.start)?;
                let end = resolve_endpoint(state, journal, &rel.end)?;
                assigned.nodes.insert(rel.start.handle, start);
                assigned.nodes.insert(rel.end.handle, end);
                let id = insert_relationship(state, journal, rel, start, end);
                assigned.relationships.push((index, id));
            }
            Ok(assigned)
        })
    }

    fn merge(&self, fragment: &mut Fragment) -> StorageResult<()> {
        self.write(fragment, |state, journal, fragment| {
            let mut assigned = Assignments::default();
            for node in fragment.nodes.iter().filter(|n| !n.is_committed()) {
                let id = merge_node(state, journal, node)?;
                assigned.nodes.insert(node.handle, id);
            }
            for (index, rel) in fragment.relationships.iter().enumerate() {
                if rel.identity.is_some() {
                    continue;
                }
                let start = resolve_endpoint(state, journal, &rel.start)?;
                let end = resolve_endpoint(state, journal, &rel.end)?;
                assigned.nodes.insert(rel.start.handle, start);
                assigned.nodes.insert(rel.end.handle, end);
                let id = merge_relationship(state, journal, rel, start, end)?;
                assigned.relationships.push((index, id));
            }
            Ok(assigned)
        })
    }

    fn match_nodes(&self, labels: &[String], conditions: &Properties) -> StorageResult<Vec<Node>> {
        let state = self.lock();
        Ok(state
            .nodes
            .iter()
            .filter(|(_, n)| labels.iter().all(|l| n.labels.contains(l)))
            .filter(|(_, n)| conditions_match(&n.properties, conditions))
            .map(|(id, n)| to_node(*id, n))
            .collect())
    }

    fn node_count(&self, label: Option<&str>) -> StorageResult<usize> {
        let state = self.lock();
        Ok(match label {
            Some(label) => state.nodes.values().filter(|n| n.labels.contains(label)).count(),
            None => state.nodes.len(),
        })
    }

    fn relationship_count(&self, rel_type: Option<&str>) -> StorageResult<usize> {
        let state = self.lock();
        Ok(match rel_type {
            Some(t) => state.relationships.values().filter(|r| r.rel_type == t).count(),
            None => state.relationships.len(),
        })
    }
}
