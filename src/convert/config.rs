//! Converter configuration

use super::retry::RetryPolicy;
use super::{ConvertError, ConvertResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Initial flush size when the buffer size controller is active
pub const ADAPTIVE_INITIAL_FLUSH: usize = 100;

/// How batches reach the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// Batches are handed over as owned values
    #[default]
    Shared,
    /// Batches are sealed into versioned parcels and opened by the worker
    Isolated,
}

/// Constructor-level settings of a `Converter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConverterConfig {
    /// Number of parallel workers; `None` picks a default from the host
    pub workers: Option<usize>,
    /// One worker, one record per batch, commit after every record
    pub serialize: bool,
    /// Records per batch
    pub batch_size: usize,
    /// Buffered graph elements that trigger a commit
    pub flush_size: usize,
    /// Let the buffer size controller tune the flush size
    pub adaptive_flush: bool,
    pub worker_mode: WorkerMode,
    pub retry: RetryPolicy,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            workers: None,
            serialize: false,
            batch_size: 5000,
            flush_size: 1,
            adaptive_flush: false,
            worker_mode: WorkerMode::Shared,
            retry: RetryPolicy::default(),
        }
    }
}

/// Available parallelism minus two, at least one.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(2))
        .unwrap_or(1)
        .max(1)
}

impl ConverterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serialized() -> Self {
        Self::default().with_serialize(true)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_size(mut self, flush_size: usize) -> Self {
        self.flush_size = flush_size;
        self
    }

    pub fn with_adaptive_flush(mut self, adaptive: bool) -> Self {
        self.adaptive_flush = adaptive;
        self
    }

    pub fn with_worker_mode(mut self, mode: WorkerMode) -> Self {
        self.worker_mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_yaml(text: &str) -> ConvertResult<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| ConvertError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> ConvertResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConvertError::Configuration(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    /// Reject contradictory or degenerate settings.
    pub fn validate(&self) -> ConvertResult<()> {
        if self.serialize && self.workers.is_some_and(|w| w > 1) {
            return Err(ConvertError::Configuration(
                "serialize cannot be combined with more than one worker".into(),
            ));
        }
        if self.workers == Some(0) {
            return Err(ConvertError::Configuration("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConvertError::Configuration("batch_size must be at least 1".into()));
        }
        if self.flush_size == 0 {
            return Err(ConvertError::Configuration("flush_size must be at least 1".into()));
        }
        if self.retry.attempts == 0 {
            return Err(ConvertError::Configuration("retry.attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn effective_workers(&self) -> usize {
        if self.serialize {
            1
        } else {
            self.workers.unwrap_or_else(default_workers)
        }
    }

    pub fn effective_batch_size(&self) -> usize {
        if self.serialize {
            1
        } else {
            self.batch_size
        }
    }

    /// Flush size a run starts with
    pub fn initial_flush_size(&self) -> usize {
        if self.serialize {
            1
        } else if self.controller_enabled() {
            ADAPTIVE_INITIAL_FLUSH
        } else {
            self.flush_size
        }
    }

    /// The controller only runs when batching is neither serial nor per record.
    pub fn controller_enabled(&self) -> bool {
        self.adaptive_flush && !self.serialize && self.batch_size > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_with_several_workers_is_rejected() {
        let err = ConverterConfig::new()
            .with_serialize(true)
            .with_workers(4)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConvertError::Configuration(_)));

        assert!(ConverterConfig::serialized().with_workers(1).validate().is_ok());
        assert!(ConverterConfig::serialized().validate().is_ok());
    }

    #[test]
    fn serialize_forces_unit_sizes() {
        let config = ConverterConfig::serialized().with_batch_size(100).with_flush_size(50);
        assert_eq!(config.effective_workers(), 1);
        assert_eq!(config.effective_batch_size(), 1);
        assert_eq!(config.initial_flush_size(), 1);
        assert!(!config.with_adaptive_flush(true).controller_enabled());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        assert!(ConverterConfig::new().with_workers(0).validate().is_err());
        assert!(ConverterConfig::new().with_batch_size(0).validate().is_err());
        assert!(ConverterConfig::new().with_flush_size(0).validate().is_err());
    }

    #[test]
    fn controller_needs_batches() {
        let config = ConverterConfig::new().with_adaptive_flush(true);
        assert!(config.controller_enabled());
        assert_eq!(config.initial_flush_size(), ADAPTIVE_INITIAL_FLUSH);
        assert!(!config.with_batch_size(1).controller_enabled());
    }

    #[test]
    fn default_workers_is_positive() {
        assert!(default_workers() >= 1);
        assert_eq!(ConverterConfig::new().effective_workers(), default_workers());
    }

    #[test]
    fn reads_yaml() {
        let config = ConverterConfig::from_yaml(
            "workers: 3\nbatch_size: 100\nworker_mode: isolated\nretry:\n  backoff_ms: 10\n",
        )
        .unwrap();
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.worker_mode, WorkerMode::Isolated);
        assert_eq!(config.retry.attempts, 2);
        assert_eq!(config.flush_size, 1);

        assert!(ConverterConfig::from_yaml("serialize: true\nworkers: 2\n").is_err());
        assert!(ConverterConfig::from_yaml("threads: 2\n").is_err());
    }
}
