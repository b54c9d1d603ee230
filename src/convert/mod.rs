//! The concurrent conversion engine
//!
//! A `Converter` pulls records from a `ResourceStream`, slices them into
//! batches and hands those to a pool of workers. Each worker applies the
//! `RuleSet`, sorts the resulting elements into create and merge buckets
//! and commits them to the `GraphStore` under a bounded retry. All nodes
//! are written in a first phase; relationships follow in a second phase
//! over the same records.

mod batcher;
mod cancel;
mod classifier;
mod config;
pub mod controller;
mod error;
mod orchestrator;
mod parcel;
mod phase;
mod retry;
mod state;
mod worker;

pub use batcher::{Batch, Batcher};
pub use cancel::CancellationToken;
pub use classifier::{classify_node, classify_relationship, Bucket, CommitBuffer};
pub use config::{default_workers, ConverterConfig, WorkerMode, ADAPTIVE_INITIAL_FLUSH};
pub use controller::{BufferSizeController, ControllerSettings};
pub use error::{ConvertError, ConvertResult};
pub use orchestrator::{Converter, RunOptions, RunState, RunSummary};
pub use parcel::{Parcel, PARCEL_VERSION};
pub use phase::Phase;
pub use retry::RetryPolicy;
pub use state::{CounterSnapshot, Progress, ProgressFn, RunContext, RunCounters};
pub use worker::{Worker, WorkerReport};
