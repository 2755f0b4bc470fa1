//! # Reconnection Policy
//!
//! `next_delay(attempt) = min(base * 2^attempt, max)`, spread by a symmetric
//! jitter band and clamped to `max` again. The jitter source is injectable so
//! tests can pin it.
//!
//! Independent draws can make a later delay shorter than an earlier one (a
//! `+ratio` draw at the cap followed by a `-ratio` draw). Callers scheduling a
//! run of retries use [`ReconnectPolicy::next_delay_after`], which never goes
//! below the previous delay of the same run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::configs::config_realtime::RealtimeOptions;

/// Returns a sample in `[-1.0, 1.0]`.
pub type JitterSource = Arc<dyn Fn() -> f64 + Send + Sync>;

#[derive(Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    max_attempts: Option<u32>,
    jitter_ratio: f64,
    jitter: JitterSource,
}

impl ReconnectPolicy {
    /// A policy without jitter.
    pub fn new(base: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base,
            max: max.max(base),
            max_attempts,
            jitter_ratio: 0.0,
            jitter: Arc::new(|| 0.0),
        }
    }

    /// Builds the policy described by `options`, jittered with the thread RNG.
    pub fn from_options(options: &RealtimeOptions) -> Self {
        Self::new(
            options.reconnect_base_delay(),
            options.reconnect_max_delay(),
            options.max_reconnect_attempts,
        )
        .with_jitter(options.jitter_ratio, random_jitter())
    }

    pub fn with_jitter(mut self, ratio: f64, source: JitterSource) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self.jitter = source;
        self
    }

    /// The un-jittered delay for `attempt` (0-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter_ratio == 0.0 {
            return delay;
        }
        let sample = (self.jitter)().clamp(-1.0, 1.0);
        let scaled = delay.as_millis() as f64 * (1.0 + self.jitter_ratio * sample);
        Duration::from_millis(scaled.max(0.0).round() as u64).min(self.max)
    }

    /// `next_delay(attempt)`, raised to at least `previous` (the delay used
    /// for the prior failure of this run) and capped at `max`.
    pub fn next_delay_after(&self, attempt: u32, previous: Option<Duration>) -> Duration {
        let delay = self.next_delay(attempt);
        match previous {
            Some(previous) => delay.max(previous).min(self.max),
            None => delay,
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }
}

impl fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("base", &self.base)
            .field("max", &self.max)
            .field("max_attempts", &self.max_attempts)
            .field("jitter_ratio", &self.jitter_ratio)
            .finish_non_exhaustive()
    }
}

fn random_jitter() -> JitterSource {
    Arc::new(|| rand::rng().random_range(-1.0..=1.0))
}
