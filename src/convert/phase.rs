use serde::{Deserialize, Serialize};

/// Which half of every rule-set entry runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Node,
    Relationship,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Node => "node",
            Phase::Relationship => "relationship",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
