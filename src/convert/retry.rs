//! Bounded retry around store commits

use super::{CancellationToken, ConvertError, ConvertResult, Phase};
use crate::storage::StorageResult;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::warn;

/// How often a failed commit is attempted, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub attempts: u32,
    #[serde(rename = "backoff_ms", with = "millis")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Run `commit` until it succeeds or the attempts are used up.
    ///
    /// The backoff sleep is cut short when `stop` trips; the commit is then
    /// abandoned with `ConvertError::Cancelled`.
    pub fn run<F>(&self, phase: Phase, what: &str, stop: &CancellationToken, mut commit: F) -> ConvertResult<()>
    where
        F: FnMut() -> StorageResult<()>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match commit() {
                Ok(()) => return Ok(()),
                Err(source) if attempt >= attempts => {
                    return Err(ConvertError::Store {
                        phase,
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        "{} {} commit failed (attempt {}/{}, transient: {}): {}. Retrying in {:?}",
                        phase,
                        what,
                        attempt,
                        attempts,
                        e.is_transient(),
                        e,
                        self.backoff
                    );
                    if !sleep_unless_stopped(self.backoff, stop) {
                        return Err(ConvertError::Cancelled);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Blocking sleep that polls `stop`. Returns false if it was cut short.
fn sleep_unless_stopped(total: Duration, stop: &CancellationToken) -> bool {
    const SLICE: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + total;
    loop {
        if stop.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
