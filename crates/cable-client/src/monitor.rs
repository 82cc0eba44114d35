//! Connection monitor — heartbeat staleness tracking and reconnect attempt
//! accounting.
//!
//! The monitor owns no timer of its own; the connection task polls it on the
//! heartbeat cadence and asks it for reconnect delays. Cancellation of a
//! scheduled reconnect is therefore structural: the task drops the timer.

use std::time::{Duration, Instant};

use cable_core::{BackoffConfig, BackoffPolicy, ReconnectStrategy};

pub struct Monitor {
    ping_interval: Duration,
    max_missing_pings: u32,
    max_reconnect_attempts: u32,
    strategy: ReconnectStrategy,
    last_ping: Instant,
    reconnect_attempts: u32,
}

impl Monitor {
    /// Build a monitor. With no custom strategy the delay schedule is
    /// exponential backoff with jitter, seeded off `ping_interval`.
    pub fn new(
        ping_interval: Duration,
        max_missing_pings: u32,
        max_reconnect_attempts: u32,
        strategy: Option<ReconnectStrategy>,
    ) -> Self {
        let strategy = strategy.unwrap_or_else(|| {
            let policy =
                BackoffPolicy::new(BackoffConfig::seeded(ping_interval, max_reconnect_attempts));
            let fallback = policy.config.max_delay;
            std::sync::Arc::new(move |attempt| policy.next_delay(attempt).unwrap_or(fallback))
        });
        Self {
            ping_interval,
            max_missing_pings,
            max_reconnect_attempts,
            strategy,
            last_ping: Instant::now(),
            reconnect_attempts: 0,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// A heartbeat arrived; the missed-ping clock restarts from zero.
    pub fn record_ping(&mut self) {
        self.last_ping = Instant::now();
    }

    /// The connection (re)reached `connected`: both the attempt counter and
    /// the missed-ping clock reset.
    pub fn record_connected(&mut self) {
        self.reconnect_attempts = 0;
        self.record_ping();
    }

    /// Full heartbeat intervals elapsed since the last ping.
    pub fn missed_pings(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.last_ping);
        (elapsed.as_millis() / self.ping_interval.as_millis().max(1)) as u32
    }

    /// `true` once more than `max_missing_pings` consecutive intervals
    /// passed without a heartbeat — the connection is silently dead even if
    /// the transport never reported a close.
    pub fn is_stale(&self, now: Instant) -> bool {
        self.missed_pings(now) > self.max_missing_pings
    }

    /// Account for one more reconnect attempt and return the delay before
    /// it, or `None` once the ceiling is exceeded (give up; the connection
    /// becomes `closed`, not endlessly `disconnected`).
    ///
    /// The ceiling always applies, even under a custom delay strategy.
    pub fn next_reconnect_delay(&mut self) -> Option<Duration> {
        self.reconnect_attempts += 1;
        if self.reconnect_attempts > self.max_reconnect_attempts {
            return None;
        }
        Some((self.strategy)(self.reconnect_attempts))
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }
}
