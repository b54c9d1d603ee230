//! Records: one input unit (a table row, a dataframe row, an API entity)

use crate::graph::{Fragment, Properties, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One typed input row.
///
/// The type tag selects the rule chain. Identifying fields (usually the
/// source's primary key columns) are only used to describe the record in
/// logs and errors.
///
/// Supplies are a per-record scratch table that rules in the same chain
/// use to hand intermediate fragments to each other. They are transient:
/// not serialized, and cleared between phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    record_type: String,
    fields: Properties,
    #[serde(default)]
    identifying: Vec<String>,
    #[serde(skip)]
    supplies: HashMap<String, Fragment>,
}

impl Record {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            fields: HashMap::new(),
            identifying: Vec::new(),
            supplies: HashMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Declare which fields identify this record
    pub fn with_identifying<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifying = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn fields(&self) -> &Properties {
        &self.fields
    }

    pub fn identifying_fields(&self) -> &[String] {
        &self.identifying
    }

    /// Render the identifying fields as `key=value` pairs, sorted by key.
    pub fn identity(&self) -> String {
        let mut keys: Vec<&String> = self.identifying.iter().collect();
        keys.sort();
        keys.iter()
            .map(|k| {
                let value = self.fields.get(*k).cloned().unwrap_or(PropertyValue::Null);
                format!("{}={}", k, value)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn supply(&self, id: &str) -> Option<&Fragment> {
        self.supplies.get(id)
    }

    pub fn set_supply(&mut self, id: impl Into<String>, fragment: Fragment) {
        self.supplies.insert(id.into(), fragment);
    }

    pub fn has_supplies(&self) -> bool {
        !self.supplies.is_empty()
    }

    pub fn clear_supplies(&mut self) {
        self.supplies.clear();
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.record_type, self.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    #[test]
    fn identity_renders_identifying_fields() {
        let record = Record::new("Person")
            .with_field("id", 7i64)
            .with_field("name", "Ada")
            .with_identifying(["id"]);
        assert_eq!(record.identity(), "id=7");
        assert_eq!(record.to_string(), "Person(id=7)");
    }

    #[test]
    fn set_overwrites_field() {
        let mut record = Record::new("Person").with_field("name", "Ada");
        record.set("name", "Grace");
        assert_eq!(record.get("name"), Some(&PropertyValue::String("Grace".into())));
    }

    #[test]
    fn supplies_are_not_serialized() {
        let mut record = Record::new("Person").with_field("id", 1i64);
        record.set_supply("person", Fragment::from(Node::new(["Person"])));
        assert!(record.has_supplies());

        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert!(!back.has_supplies());
        assert_eq!(back.get("id"), Some(&PropertyValue::Int(1)));
    }
}
