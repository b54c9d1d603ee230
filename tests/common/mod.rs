//! Common test utilities for conversion runs
//!
//! Record factories, rule sets for a small social graph, and a store
//! wrapper that injects failures.

pub mod faults;
pub mod fixtures;

#[allow(unused_imports)]
pub use faults::FlakyStore;
#[allow(unused_imports)]
pub use fixtures::{
    friendship, friendships, like, people, person, quick_retry, social_rules, KNOWS, LIKES,
};
