//! Reconnect backoff policy and delay calculation.
//!
//! Provides the sync-only math for the reconnect engine:
//!
//! - [`BackoffPolicy`]: base delay, cap, attempt limit, jitter
//! - [`BackoffPolicy::exponential_delay`]: `min(base * 2^attempt, max)`
//! - [`BackoffPolicy::delay_with_random`]: exponential delay plus up to
//!   `jitter_factor` of itself, driven by a caller-supplied random value
//!
//! Jitter is one-sided: the result always lies in
//! `[exponential, exponential * (1 + jitter_factor)]`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Jitter factor (fraction of the exponential delay added at most).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Backoff parameters for reconnect attempts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Base delay in ms.
    pub base_delay_ms: u64,
    /// Cap on the exponential delay in ms (jitter may exceed it by `jitter_factor`).
    pub max_delay_ms: u64,
    /// Attempts allowed before the engine reports terminal failure.
    pub max_attempts: u32,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// Exponential delay in ms for `attempt`, capped at `max_delay_ms`.
    #[must_use]
    pub fn exponential_delay(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(1u64 << attempt.min(31))
            .min(self.max_delay_ms)
    }

    /// Delay in ms with jitter derived from `random` in `[0.0, 1.0)`.
    ///
    /// Out-of-range randoms are clamped so the bound always holds.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> u64 {
        let exponential = self.exponential_delay(attempt);
        let jitter = (exponential as f64) * self.jitter_factor * random.clamp(0.0, 1.0);
        exponential.saturating_add(jitter.floor() as u64)
    }

    /// Delay for `attempt` as a [`Duration`], with the given random value.
    #[must_use]
    pub fn delay(&self, attempt: u32, random: f64) -> Duration {
        Duration::from_millis(self.delay_with_random(attempt, random))
    }

    /// Whether `attempt` (1-based) exceeds the limit.
    #[must_use]
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
