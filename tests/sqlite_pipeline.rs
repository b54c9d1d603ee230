//! SQLite tables to a SQLite-backed graph, driven by YAML rules
//!
//! Run with: `cargo test --test sqlite_pipeline`

use rowgraph::{
    load_rules, Converter, ConverterConfig, GraphStore, OpenStore, Properties, PropertyValue, RetryPolicy,
    RunOptions, SqliteGraph, SqliteStream, WorkerMode,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const RULES: &str = r#"
entities:
  person:
    nodes:
      - id: person
        labels: [Person]
        primary_key: ID
        properties:
          ID: { field: id, as: int }
          name: { field: name }
    relationships:
      - type: WORKS_AT
        from: { node: person }
        to: { labels: [Company], where: { name: { field: employer } } }
        optional: true
  company:
    nodes:
      - id: company
        labels: [Company]
        primary_key: name
        properties:
          name: { field: name }
  friendship:
    relationships:
      - type: KNOWS
        from: { labels: [Person], where: { ID: { field: a, as: int } } }
        to: { labels: [Person], where: { ID: { field: b, as: int } } }
        merge: true
"#;

fn write_source(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL, employer TEXT);
         CREATE TABLE company (name TEXT PRIMARY KEY);
         CREATE TABLE friendship (a INTEGER NOT NULL, b INTEGER NOT NULL, PRIMARY KEY (a, b));
         CREATE TABLE audit (note TEXT);",
    )
    .unwrap();
    for (id, name, employer) in [
        (1, "Ada", Some("Acme")),
        (2, "Grace", Some("Acme")),
        (3, "Linus", Some("Initech")),
        (4, "Barbara", None),
    ] {
        conn.execute(
            "INSERT INTO person (id, name, employer) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, name, employer],
        )
        .unwrap();
    }
    for name in ["Acme", "Initech"] {
        conn.execute("INSERT INTO company (name) VALUES (?1)", [name]).unwrap();
    }
    for (a, b) in [(1, 2), (2, 3), (3, 4), (4, 1)] {
        conn.execute("INSERT INTO friendship (a, b) VALUES (?1, ?2)", [a, b])
            .unwrap();
    }
}

fn config(mode: WorkerMode) -> ConverterConfig {
    ConverterConfig::new()
        .with_workers(3)
        .with_batch_size(2)
        .with_worker_mode(mode)
        .with_retry(RetryPolicy::new(2, Duration::from_millis(5)))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tables_become_a_graph() {
    for mode in [WorkerMode::Shared, WorkerMode::Isolated] {
        let dir = TempDir::new().unwrap();
        let source_path = dir.path().join("source.db");
        let rules_path = dir.path().join("rules.yaml");
        write_source(&source_path);
        std::fs::write(&rules_path, RULES).unwrap();

        let source = SqliteStream::builder(&source_path)
            .with_tables(["person", "company", "friendship"])
            .with_page_size(2)
            .build()
            .unwrap();
        let graph = Arc::new(SqliteGraph::open(dir.path().join("graph").join("graph.db")).unwrap());
        let mut converter =
            Converter::new(config(mode), load_rules(&rules_path).unwrap(), source, graph.clone()).unwrap();

        let summary = converter.run(RunOptions::full()).await.unwrap();

        assert_eq!(graph.node_count(Some("Person")).unwrap(), 4, "{:?}", mode);
        assert_eq!(graph.node_count(Some("Company")).unwrap(), 2);
        assert_eq!(graph.relationship_count(Some("KNOWS")).unwrap(), 4);
        assert_eq!(graph.relationship_count(Some("WORKS_AT")).unwrap(), 3);
        assert_eq!(summary.counters.nodes_committed, 6);

        let conditions: Properties = [("ID".to_string(), PropertyValue::Int(1))].into_iter().collect();
        let ada = graph.match_nodes(&["Person".to_string()], &conditions).unwrap();
        assert_eq!(ada.len(), 1);
        assert_eq!(ada[0].get("name"), Some(&PropertyValue::from("Ada")));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rerunning_into_the_same_graph_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("source.db");
    let graph_path = dir.path().join("graph.db");
    let rules_path = dir.path().join("rules.yaml");
    write_source(&source_path);
    std::fs::write(&rules_path, RULES).unwrap();

    for _ in 0..2 {
        let source = SqliteStream::builder(&source_path)
            .with_tables(["person", "company", "friendship"])
            .build()
            .unwrap();
        let graph = Arc::new(SqliteGraph::open(&graph_path).unwrap());
        let mut converter =
            Converter::new(config(WorkerMode::Shared), load_rules(&rules_path).unwrap(), source, graph).unwrap();
        converter.run(RunOptions::full()).await.unwrap();
    }

    let graph = SqliteGraph::open(&graph_path).unwrap();
    assert_eq!(graph.node_count(None).unwrap(), 6);
    // KNOWS is merged; WORKS_AT is created again on the second run
    assert_eq!(graph.relationship_count(Some("KNOWS")).unwrap(), 4);
    assert_eq!(graph.relationship_count(Some("WORKS_AT")).unwrap(), 6);
}

#[test]
fn tables_without_primary_key_are_rejected() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("source.db");
    write_source(&source_path);

    assert!(SqliteStream::builder(&source_path).with_tables(["audit"]).build().is_err());
    assert!(SqliteStream::builder(&source_path)
        .with_tables(["audit"])
        .with_primary_keys("audit", vec!["note"])
        .build()
        .is_ok());
    assert!(SqliteStream::builder(&source_path).with_tables(["missing"]).build().is_err());
}
