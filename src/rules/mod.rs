//! Transformation rules: what turns one record into a graph fragment
//!
//! A `RuleSet` maps every record type to two rule chains, one per phase.
//! Chains are shared read-only across all workers; the only per-call
//! mutable state a chain may touch is the record itself (fields and
//! supplies) and whatever the caller registered in `GlobalState`.

mod chain;
mod context;
pub mod declarative;
mod global_state;
mod set;

pub use chain::{ChainSeq, EmptyChain, FnChain, MergeRelationships};
pub use context::{NodeMatcher, RuleContext};
pub use global_state::GlobalState;
pub use set::{RuleSet, TypeMask};

use crate::graph::Fragment;
use crate::resource::Record;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised while applying or compiling rules
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Missing field '{0}'")]
    MissingField(String),

    #[error("Cannot convert '{field}' value {value} to {target}")]
    Conversion {
        field: String,
        value: String,
        target: &'static str,
    },

    #[error("No node matched {0}")]
    NoMatch(String),

    #[error("Store lookup failed: {0}")]
    Store(#[from] StorageError),

    #[error("Invalid rules: {0}")]
    Compile(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by a custom hook
    #[error("{0}")]
    Hook(String),
}

/// A compiled transformation from one record to one fragment.
///
/// `apply` is called once per record per phase and may stash intermediate
/// fragments into the record's supplies for later steps of the same chain.
pub trait RuleChain: Send + Sync {
    fn apply(&self, record: &mut Record, ctx: &RuleContext<'_>) -> Result<Fragment, RuleError>;

    /// True if the chain can never produce anything. Empty chains keep
    /// their record type out of the phase's type mask.
    fn is_empty(&self) -> bool {
        false
    }
}
