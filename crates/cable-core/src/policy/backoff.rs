//! Exponential reconnect backoff with jitter, seeded off the heartbeat
//! interval.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Configuration for the reconnect backoff schedule.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum number of reconnect attempts before giving up for good.
    pub max_attempts: u32,
    /// Initial delay (seeded off the heartbeat interval by default).
    pub base: Duration,
    /// Maximum delay (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier applied to the delay on each attempt.
    pub multiplier: f64,
    /// Add up to `jitter_fraction * delay` of multiplicative jitter
    /// (0.0 = no jitter). Keeps the expected delay non-decreasing.
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Derive a schedule from the heartbeat cadence: the first retry fires
    /// after roughly half a ping interval.
    pub fn seeded(ping_interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base: ping_interval / 2,
            ..Self::default()
        }
    }
}

/// Stateless backoff policy — computes the delay for a given attempt number.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th reconnect (1-based), or
    /// `None` once `attempt` exceeds `max_attempts` (give up).
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_attempts {
            return None;
        }
        let base_ms = self.config.base.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.config.max_delay.as_millis() as f64);

        let total_ms = capped * (1.0 + self.config.jitter_fraction * jitter_frac());
        Some(Duration::from_millis(total_ms as u64))
    }
}

/// Cheap jitter source in `[0, 1)` — enough to de-synchronize reconnect
/// herds without pulling in an RNG crate.
fn jitter_frac() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}
