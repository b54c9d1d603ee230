//! rowgraph: concurrent conversion of relational records into a property graph
//!
//! Records are pulled from a [`ResourceStream`], turned into graph
//! fragments by a [`RuleSet`], and committed to a [`GraphStore`] by a pool
//! of workers. Every run writes all nodes before any relationship.
//!
//! # Core Concepts
//!
//! - **Records**: typed input rows; the type tag selects the rules
//! - **Fragments**: the nodes and relationships one record yields in one phase
//! - **Create / merge**: elements with a primary key are upserted under a
//!   single run-wide lock, everything else is inserted blindly
//!
//! # Example
//!
//! ```
//! use rowgraph::{Converter, ConverterConfig, MemoryGraph, RuleSet, VecStream};
//! use std::sync::Arc;
//!
//! let converter = Converter::new(
//!     ConverterConfig::serialized(),
//!     RuleSet::new(),
//!     VecStream::new(Vec::new()),
//!     Arc::new(MemoryGraph::new()),
//! );
//! assert!(converter.is_ok());
//! ```

pub mod convert;
pub mod graph;
pub mod resource;
pub mod rules;
pub mod storage;

pub use convert::{
    CancellationToken, ConvertError, ConvertResult, Converter, ConverterConfig, CounterSnapshot, Phase, Progress,
    RetryPolicy, RunOptions, RunState, RunSummary, WorkerMode,
};
pub use graph::{Fragment, Node, NodeHandle, NodeId, PrimaryKey, Properties, PropertyValue, Relationship, RelationshipId};
pub use resource::{ChainStream, Record, ResourceStream, SourceError, SqliteStream, VecStream};
pub use rules::declarative::{load_rules, RuleDocument};
pub use rules::{FnChain, GlobalState, RuleChain, RuleContext, RuleError, RuleSet};
pub use storage::{GraphStore, MemoryGraph, OpenStore, SqliteGraph, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
