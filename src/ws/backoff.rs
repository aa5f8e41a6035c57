//! Reconnect backoff
//!
//! Exponential backoff with upward-only jitter. The jitter never exceeds the
//! growth of the next step (`jitter_factor <= multiplier - 1`), so successive
//! delays never shrink, and every delay is capped at `max_delay`. Attempts are
//! unbounded; the caller decides when to stop.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor per attempt (>= 1.0)
    pub multiplier: f64,
    /// Upward jitter as a fraction of the base delay
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl ReconnectConfig {
    /// Cool-off schedule used while the token pool is exhausted
    pub fn cooloff() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    fn normalized(mut self) -> Self {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            self.multiplier = 1.0;
        }
        if !self.jitter_factor.is_finite() || self.jitter_factor < 0.0 {
            self.jitter_factor = 0.0;
        }
        self.jitter_factor = self.jitter_factor.min(self.multiplier - 1.0);
        if self.initial_delay > self.max_delay {
            self.initial_delay = self.max_delay;
        }
        self
    }
}

/// Stateful backoff: one policy per retry stream
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config: config.normalized(),
            attempt: 0,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_millis(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let max = self.config.max_delay.as_millis() as f64;
        let jitter = if self.config.jitter_factor > 0.0 && base > 0.0 {
            rand::rng().random_range(0.0..=base * self.config.jitter_factor)
        } else {
            0.0
        };

        Duration::from_millis((base + jitter).min(max).floor() as u64)
    }

    /// Back to the initial delay after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts since the last reset
    pub fn attempt_count(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn base_millis(&self, attempt: u32) -> f64 {
        let initial = self.config.initial_delay.as_millis() as f64;
        let max = self.config.max_delay.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        (initial * self.config.multiplier.powi(exponent)).min(max)
    }
}
