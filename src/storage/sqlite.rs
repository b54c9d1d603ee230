//! SQLite storage backend

use super::traits::{property_matches, GraphStore, OpenStore, StorageError, StorageResult};
use crate::graph::{
    Fragment, Node, NodeHandle, NodeId, PrimaryKey, Properties, PropertyValue, Relationship,
    RelationshipId,
};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// SQLite-backed property graph
///
/// Nodes, their labels and relationships live in three tables; properties
/// are stored as JSON. Every `create`/`merge` call runs in its own
/// transaction. Thread-safe via internal mutex on the connection.
pub struct SqliteGraph {
    conn: Mutex<Connection>,
}

impl SqliteGraph {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                handle TEXT NOT NULL,
                properties_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS node_labels (
                node_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                PRIMARY KEY (node_id, label),
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_node_labels_label
                ON node_labels(label, node_id);

            -- Every handle a node was written or merged under
            CREATE TABLE IF NOT EXISTS node_handles (
                handle TEXT PRIMARY KEY,
                node_id INTEGER NOT NULL,
                FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rel_type TEXT NOT NULL,
                start_id INTEGER NOT NULL,
                end_id INTEGER NOT NULL,
                properties_json TEXT NOT NULL,
                FOREIGN KEY (start_id) REFERENCES nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (end_id) REFERENCES nodes(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_relationships_endpoints
                ON relationships(rel_type, start_id, end_id);

            PRAGMA foreign_keys = ON;

            -- Concurrent readers while a worker commits
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // An open transaction is rolled back when dropped, so a poisoned
        // connection carries no partial writes.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write<F>(&self, fragment: &mut Fragment, op: F) -> StorageResult<()>
    where
        F: FnOnce(&Transaction<'_>, &Fragment) -> StorageResult<Assignments>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let assignments = op(&tx, fragment)?;
        tx.commit()?;
        assignments.apply(fragment);
        Ok(())
    }
}

impl OpenStore for SqliteGraph {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

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

fn to_sql_value(value: &PropertyValue) -> StorageResult<Value> {
    Ok(match value {
        PropertyValue::Null => Value::Null,
        PropertyValue::Bool(b) => Value::Integer(i64::from(*b)),
        PropertyValue::Int(i) => Value::Integer(*i),
        PropertyValue::Float(x) => Value::Real(*x),
        PropertyValue::String(s) => Value::Text(s.clone()),
        // json_extract hands arrays back as JSON text
        PropertyValue::Array(_) => Value::Text(serde_json::to_string(value)?),
    })
}

fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', "\\\""))
}

fn parse_handle(raw: &str) -> StorageResult<NodeHandle> {
    Ok(serde_json::from_value(serde_json::Value::String(raw.to_string()))?)
}

fn handle_text(handle: &NodeHandle) -> String {
    handle.to_string()
}

fn load_labels(tx: &Connection, id: i64) -> StorageResult<BTreeSet<String>> {
    let mut stmt = tx.prepare_cached("SELECT label FROM node_labels WHERE node_id = ?1")?;
    let labels = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(labels)
}

/// Nodes carrying every label and equal on every condition.
///
/// `json_extract` narrows the candidates; equality is rechecked on the
/// decoded properties because SQLite compares `1` and `1.0` as equal.
fn find_nodes(conn: &Connection, labels: &[String], conditions: &Properties) -> StorageResult<Vec<Node>> {
    let mut sql = String::from("SELECT n.id, n.handle, n.properties_json FROM nodes n WHERE 1 = 1");
    let mut params_vec: Vec<Value> = Vec::new();

    for label in labels {
        sql.push_str(" AND EXISTS (SELECT 1 FROM node_labels l WHERE l.node_id = n.id AND l.label = ?)");
        params_vec.push(Value::Text(label.clone()));
    }
    for (key, value) in conditions {
        sql.push_str(" AND json_extract(n.properties_json, ?) IS ?");
        params_vec.push(Value::Text(json_path(key)));
        params_vec.push(to_sql_value(value)?);
    }
    sql.push_str(" ORDER BY n.id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params_vec.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut nodes = Vec::with_capacity(rows.len());
    for (id, handle, properties_json) in rows {
        let properties: Properties = serde_json::from_str(&properties_json)?;
        if !conditions
            .iter()
            .all(|(k, v)| property_matches(&properties, k, v))
        {
            continue;
        }
        nodes.push(Node {
            handle: parse_handle(&handle)?,
            identity: Some(NodeId::from_raw(id as u64)),
            labels: load_labels(conn, id)?,
            properties,
            primary_key: None,
            primary_label: None,
        });
    }
    Ok(nodes)
}

fn bind_handle(tx: &Connection, handle: &NodeHandle, id: i64) -> StorageResult<()> {
    tx.execute(
        "INSERT OR IGNORE INTO node_handles (handle, node_id) VALUES (?1, ?2)",
        params![handle_text(handle), id],
    )?;
    Ok(())
}

fn insert_node(tx: &Connection, node: &Node) -> StorageResult<NodeId> {
    tx.execute(
        "INSERT INTO nodes (handle, properties_json) VALUES (?1, ?2)",
        params![handle_text(&node.handle), serde_json::to_string(&node.properties)?],
    )?;
    let id = tx.last_insert_rowid();
    for label in &node.labels {
        tx.execute(
            "INSERT INTO node_labels (node_id, label) VALUES (?1, ?2)",
            params![id, label],
        )?;
    }
    bind_handle(tx, &node.handle, id)?;
    Ok(NodeId::from_raw(id as u64))
}

fn merge_node(tx: &Connection, node: &Node) -> StorageResult<NodeId> {
    let (key, value) = match node.merge_key() {
        Some(pair) => pair,
        None => return insert_node(tx, node),
    };
    let label = node.merge_label().unwrap_or_default().to_string();
    let conditions: Properties = HashMap::from([(key.to_string(), value.clone())]);
    let matches = find_nodes(tx, std::slice::from_ref(&label), &conditions)?;

    match matches.as_slice() {
        [] => insert_node(tx, node),
        [existing] => {
            let raw = existing.identity.map(|id| id.as_u64() as i64).unwrap_or_default();
            let mut properties = existing.properties.clone();
            properties.extend(node.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            tx.execute(
                "UPDATE nodes SET properties_json = ?1 WHERE id = ?2",
                params![serde_json::to_string(&properties)?, raw],
            )?;
            for label in &node.labels {
                tx.execute(
                    "INSERT OR IGNORE INTO node_labels (node_id, label) VALUES (?1, ?2)",
                    params![raw, label],
                )?;
            }
            bind_handle(tx, &node.handle, raw)?;
            Ok(NodeId::from_raw(raw as u64))
        }
        many => Err(StorageError::MergeConflict {
            label,
            key: key.to_string(),
            value: value.to_string(),
            matches: many.len(),
        }),
    }
}

fn resolve_endpoint(tx: &Connection, node: &Node) -> StorageResult<NodeId> {
    if let Some(id) = node.identity {
        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM nodes WHERE id = ?1",
                params![id.as_u64() as i64],
                |row| row.get(0),
            )
            .optional()?;
        return match exists {
            Some(_) => Ok(id),
            None => Err(StorageError::MissingEndpoint(format!("{} (identity {})", node, id))),
        };
    }
    let known: Option<i64> = tx
        .query_row(
            "SELECT node_id FROM node_handles WHERE handle = ?1",
            params![handle_text(&node.handle)],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(raw) = known {
        return Ok(NodeId::from_raw(raw as u64));
    }
    if node.primary_key.is_some() {
        merge_node(tx, node)
    } else {
        insert_node(tx, node)
    }
}

fn insert_relationship(tx: &Connection, rel: &Relationship, start: NodeId, end: NodeId) -> StorageResult<RelationshipId> {
    tx.execute(
        "INSERT INTO relationships (rel_type, start_id, end_id, properties_json) VALUES (?1, ?2, ?3, ?4)",
        params![
            rel.rel_type,
            start.as_u64() as i64,
            end.as_u64() as i64,
            serde_json::to_string(&rel.properties)?,
        ],
    )?;
    Ok(RelationshipId::from_raw(tx.last_insert_rowid() as u64))
}

fn merge_relationship(tx: &Connection, rel: &Relationship, start: NodeId, end: NodeId) -> StorageResult<RelationshipId> {
    let key = match &rel.primary_key {
        Some(key) => key,
        None => return insert_relationship(tx, rel, start, end),
    };
    let key_value = match key {
        PrimaryKey::Property(k) => Some((
            k.as_str(),
            rel.properties.get(k).cloned().unwrap_or(PropertyValue::Null),
        )),
        PrimaryKey::Ghost => None,
    };

    let mut stmt = tx.prepare_cached(
        "SELECT id, properties_json FROM relationships WHERE rel_type = ?1 AND start_id = ?2 AND end_id = ?3",
    )?;
    let candidates = stmt
        .query_map(
            params![rel.rel_type, start.as_u64() as i64, end.as_u64() as i64],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let mut matches = Vec::new();
    for (id, properties_json) in candidates {
        let properties: Properties = serde_json::from_str(&properties_json)?;
        let hit = match &key_value {
            Some((k, v)) => property_matches(&properties, k, v),
            None => true,
        };
        if hit {
            matches.push((id, properties));
        }
    }

    match matches.len() {
        0 => insert_relationship(tx, rel, start, end),
        1 => {
            let (id, mut properties) = matches.remove(0);
            properties.extend(rel.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            tx.execute(
                "UPDATE relationships SET properties_json = ?1 WHERE id = ?2",
                params![serde_json::to_string(&properties)?, id],
            )?;
            Ok(RelationshipId::from_raw(id as u64))
        }
        n => Err(StorageError::MergeConflict {
            label: rel.rel_type.clone(),
            key: key_value.map(|(k, _)| k.to_string()).unwrap_or_else(|| "<endpoints>".into()),
            value: format!("{}->{}", start, end),
            matches: n,
        }),
    }
}

impl GraphStore for SqliteGraph {
    fn create(&self, fragment: &mut Fragment) -> StorageResult<()> {
        self.write(fragment, |tx, fragment| {
            let mut assigned = Assignments::default();
            for node in fragment.nodes.iter().filter(|n| !n.is_committed()) {
                let id = insert_node(tx, node)?;
                assigned.nodes.insert(node.handle, id);
            }
            for (index, rel) in fragment.relationships.iter().enumerate() {
                if rel.identity.is_some() {
                    continue;
                }
                let start = resolve_endpoint(tx, &rel.start)?;
                let end = resolve_endpoint(tx, &rel.end)?;
                assigned.nodes.insert(rel.start.handle, start);
                assigned.nodes.insert(rel.end.handle, end);
                let id = insert_relationship(tx, rel, start, end)?;
                assigned.relationships.push((index, id));
            }
            Ok(assigned)
        })
    }

    fn merge(&self, fragment: &mut Fragment) -> StorageResult<()> {
        self.write(fragment, |tx, fragment| {
            let mut assigned = Assignments::default();
            for node in fragment.nodes.iter().filter(|n| !n.is_committed()) {
                let id = merge_node(tx, node)?;
                assigned.nodes.insert(node.handle, id);
            }
            for (index, rel) in fragment.relationships.iter().enumerate() {
                if rel.identity.is_some() {
                    continue;
                }
                let start = resolve_endpoint(tx, &rel.start)?;
                let end = resolve_endpoint(tx, &rel.end)?;
                assigned.nodes.insert(rel.start.handle, start);
                assigned.nodes.insert(rel.end.handle, end);
                let id = merge_relationship(tx, rel, start, end)?;
                assigned.relationships.push((index, id));
            }
            Ok(assigned)
        })
    }

    fn match_nodes(&self, labels: &[String], conditions: &Properties) -> StorageResult<Vec<Node>> {
        let conn = self.lock();
        find_nodes(&conn, labels, conditions)
    }

    fn node_count(&self, label: Option<&str>) -> StorageResult<usize> {
        let conn = self.lock();
        let count: i64 = match label {
            Some(label) => conn.query_row(
                "SELECT COUNT(*) FROM node_labels WHERE label = ?1",
                params![label],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    fn relationship_count(&self, rel_type: Option<&str>) -> StorageResult<usize> {
        let conn = self.lock();
        let count: i64 = match rel_type {
            Some(t) => conn.query_row(
                "SELECT COUNT(*) FROM relationships WHERE rel_type = ?1",
                params![t],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }
}
