//! Core graph data structures

mod fragment;
mod node;
mod relationship;

#[cfg(test)]
mod tests;

pub use fragment::{Attribute, Fragment};
pub use node::{Node, NodeHandle, NodeId, Properties, PropertyValue};
pub use relationship::{PrimaryKey, Relationship, RelationshipId};
