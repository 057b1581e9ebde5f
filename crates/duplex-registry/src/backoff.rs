//! Exponential backoff schedule with bounded jitter.

use std::time::Duration;

use duplex_core::config::{
    DEFAULT_BASE_DELAY, DEFAULT_JITTER_RATIO, DEFAULT_MAX_DELAY, DEFAULT_MAX_EXPONENT,
    RegistryConfig,
};
use rand::Rng;

/// Delay schedule between existence checks.
///
/// `delay(n) = min(base * 2^min(n - 1, max_exponent), max)` for the n-th
/// wait (1-based), plus a uniform jitter in `[0, jitter_ratio * delay]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_exponent: u32,
    pub jitter_ratio: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            max: DEFAULT_MAX_DELAY,
            max_exponent: DEFAULT_MAX_EXPONENT,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl From<&RegistryConfig> for Backoff {
    fn from(cfg: &RegistryConfig) -> Self {
        Self {
            base: cfg.base_delay(),
            max: cfg.max_delay(),
            max_exponent: cfg.max_exponent(),
            jitter_ratio: cfg.jitter_ratio(),
        }
    }
}

impl Backoff {
    /// Disable jitter (deterministic schedule).
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ratio = 0.0;
        self
    }

    /// Deterministic part of the delay before check `attempt + 1`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(self.max_exponent).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Base delay plus jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 || delay.is_zero() {
            return delay;
        }
        // RNG is scoped here so it never lives across an await.
        let fraction = rand::rng().random_range(0.0..=ratio);
        delay + delay.mul_f64(fraction)
    }
}
