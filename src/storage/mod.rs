//! Graph storage backends
//!
//! The conversion engine writes through the `GraphStore` trait.
//! `MemoryGraph` keeps everything in process; `SqliteGraph` persists to a
//! single SQLite file.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryGraph;
pub use sqlite::SqliteGraph;
pub use traits::{GraphStore, OpenStore, StorageError, StorageResult};
