//! Serialization tests against the wire shape of graph elements

use serde_json::{json, Value};

/// Fixture: a keyed Person node as it crosses a worker boundary
fn keyed_node_fixture() -> Value {
    json!({
        "handle": "8c4b1d7e-2f41-4b61-9a36-3c1a0e8d5f10",
        "identity": null,
        "labels": ["Person"],
        "properties": {
            "ID": 1,
            "name": "Alice",
            "score": 0.5,
            "active": true,
            "nickname": null
        },
        "primary_key": "ID",
        "primary_label": "Person"
    })
}

#[cfg(test)]
mod serialization_tests {
    use super::*;
    use crate::graph::{Node, PrimaryKey, PropertyValue, Relationship};

    #[test]
    fn property_values_deserialize_untagged() {
        let node: Node = serde_json::from_value(keyed_node_fixture()).unwrap();

        assert_eq!(node.get("ID"), Some(&PropertyValue::Int(1)));
        assert_eq!(node.get("name"), Some(&PropertyValue::String("Alice".into())));
        assert_eq!(node.get("score"), Some(&PropertyValue::Float(0.5)));
        assert_eq!(node.get("active"), Some(&PropertyValue::Bool(true)));
        assert_eq!(node.get("nickname"), Some(&PropertyValue::Null));
    }

    #[test]
    fn keyed_node_exposes_merge_key() {
        let node: Node = serde_json::from_value(keyed_node_fixture()).unwrap();

        assert_eq!(node.merge_label(), Some("Person"));
        let (key, value) = node.merge_key().unwrap();
        assert_eq!(key, "ID");
        assert_eq!(value, PropertyValue::Int(1));
        assert!(!node.is_committed());
    }

    #[test]
    fn merge_label_falls_back_to_first_label() {
        let node = Node::new(["Zebra", "Animal"]).with_primary_key("id");
        assert_eq!(node.merge_label(), Some("Animal"));
    }

    #[test]
    fn missing_key_property_merges_on_null() {
        let node = Node::new(["Person"]).with_primary_key("ID");
        let (_, value) = node.merge_key().unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn ghost_key_serializes_without_property() {
        let rel = Relationship::new(Node::new(["A"]), "REL", Node::new(["B"])).ghost_keyed();
        let json = serde_json::to_value(&rel.primary_key).unwrap();
        assert_eq!(json, json!({"kind": "ghost"}));

        let keyed = PrimaryKey::Property("since".into());
        let json = serde_json::to_value(&keyed).unwrap();
        assert_eq!(json, json!({"kind": "property", "key": "since"}));
    }

    #[test]
    fn node_display_shows_labels_and_key() {
        let node = Node::new(["Person"])
            .with_property("ID", 4i64)
            .with_primary_key("ID");
        assert_eq!(node.to_string(), "(:Person {ID: 4})");
    }
}
