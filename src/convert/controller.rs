//! Background hill climbing of the flush size
//!
//! Every round the controller measures the time per committed record at
//! the current flush size and at one step above and below it, then adopts
//! the fastest of the three. Steps shrink as the flush size grows, and now
//! and then a random larger step is tried to get out of a local minimum.

use super::state::RunContext;
use super::CancellationToken;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const MIN_FLUSH_SIZE: usize = 1;
pub const MAX_FLUSH_SIZE: usize = 1000;

/// Timing of the measurement loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// Pause between rounds
    pub interval: Duration,
    /// Minimum length of one sample
    pub window: Duration,
    /// How often a random larger step replaces the regular one
    pub jump_probability: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            window: Duration::from_millis(500),
            jump_probability: 0.1,
        }
    }
}

/// Exploratory step for `current`; smaller sizes take larger steps.
pub fn step_size(current: usize) -> usize {
    (10_000 / current.max(1)).clamp(MIN_FLUSH_SIZE, MAX_FLUSH_SIZE)
}

/// Round to the nearest multiple of ten and clamp into bounds.
pub fn normalize(size: usize) -> usize {
    let rounded = (size + 5) / 10 * 10;
    rounded.clamp(MIN_FLUSH_SIZE, MAX_FLUSH_SIZE)
}

/// The three sizes sampled in one round: current, above, below.
pub fn candidates(current: usize, step: usize) -> [usize; 3] {
    let current = current.clamp(MIN_FLUSH_SIZE, MAX_FLUSH_SIZE);
    [
        current,
        current.saturating_add(step).min(MAX_FLUSH_SIZE),
        current.saturating_sub(step).max(MIN_FLUSH_SIZE),
    ]
}

/// Size with the lowest time per record, normalised. Earlier samples win
/// ties, so an unchanged measurement keeps the current size.
pub fn choose(samples: &[(usize, f64)]) -> Option<usize> {
    samples
        .iter()
        .filter(|(_, t)| t.is_finite())
        .fold(None::<(usize, f64)>, |best, &(size, t)| match best {
            Some((_, best_t)) if best_t <= t => best,
            _ => Some((size, t)),
        })
        .map(|(size, _)| normalize(size))
}

/// One round's step, occasionally replaced by a random jump.
fn next_step<R: Rng>(current: usize, jump_probability: f64, rng: &mut R) -> usize {
    let step = step_size(current);
    if rng.gen_bool(jump_probability.clamp(0.0, 1.0)) {
        rng.gen_range(step..=MAX_FLUSH_SIZE)
    } else {
        step
    }
}

pub struct BufferSizeController {
    ctx: Arc<RunContext>,
    settings: ControllerSettings,
    stop: CancellationToken,
}

impl BufferSizeController {
    pub fn new(ctx: Arc<RunContext>, settings: ControllerSettings, stop: CancellationToken) -> Self {
        Self { ctx, settings, stop }
    }

    fn halted(&self) -> bool {
        self.stop.is_cancelled() || self.ctx.should_stop()
    }

    /// Run until stopped. The stop flags are polled between and inside
    /// measurement windows, never waited on indefinitely.
    pub async fn run(self) {
        let mut rng = StdRng::from_entropy();
        debug!("buffer size controller started at {}", self.ctx.flush_size());

        while !self.halted() {
            let current = self.ctx.flush_size();
            let step = next_step(current, self.settings.jump_probability, &mut rng);

            let mut samples = Vec::with_capacity(3);
            for size in candidates(current, step) {
                match self.sample(size).await {
                    Some(per_record) => samples.push((size, per_record)),
                    None => break,
                }
            }
            if self.halted() {
                break;
            }

            let chosen = choose(&samples).unwrap_or_else(|| normalize(current));
            self.ctx.set_flush_size(chosen);
            debug!("buffer size controller: {:?} -> {}", samples, chosen);

            if !self.pause(self.settings.interval).await {
                break;
            }
        }
        debug!("buffer size controller stopped at {}", self.ctx.flush_size());
    }

    /// Seconds per committed record at `size`. Waits for at least the
    /// window and at least one committed record; `None` if stopped first.
    async fn sample(&self, size: usize) -> Option<f64> {
        self.ctx.set_flush_size(size);
        let before = self.ctx.counters().resources_seen();
        let started = Instant::now();

        if !self.pause(self.settings.window).await {
            return None;
        }
        loop {
            let seen = self.ctx.counters().resources_seen() - before;
            if seen > 0 {
                return Some(started.elapsed().as_secs_f64() / seen as f64);
            }
            if !self.pause(Duration::from_millis(10)).await {
                return None;
            }
        }
    }

    /// Sleep in short slices; false if stopped meanwhile.
    async fn pause(&self, total: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + total;
        loop {
            if self.halted() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(Duration::from_millis(20))).await;
        }
    }
}
