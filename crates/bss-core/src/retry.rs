//! Reconnect policy and backoff calculation.
//!
//! Provides the portable, sync-only building blocks for reconnection. The
//! async scheduling lives in `bss-realtime`'s connection manager:
//!
//! - [`ReconnectPolicy`]: base delay, cap, attempt limit and optional jitter
//! - [`calculate_backoff_delay`]: pure exponential backoff, capped
//! - [`calculate_backoff_delay_with_random`]: the same with symmetric jitter

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default maximum number of reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Reconnection parameters for a connection manager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts allowed before giving up (default: 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Jitter factor 0.0–1.0 (default: 0.0, no jitter).
    #[serde(default)]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Whether another attempt may be scheduled after `attempts` attempts.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before reconnect attempt number `attempt + 1` (`attempt` is zero-based).
    ///
    /// With a zero jitter factor this is exactly `min(base * 2^attempt, max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = if self.jitter_factor > 0.0 {
            calculate_backoff_delay_with_random(
                attempt,
                self.base_delay_ms,
                self.max_delay_ms,
                self.jitter_factor,
                rand::random::<f64>(),
            )
        } else {
            calculate_backoff_delay(attempt, self.base_delay_ms, self.max_delay_ms)
        };
        Duration::from_millis(ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate exponential backoff delay without jitter.
///
/// Formula: `min(max_delay, base_delay * 2^attempt)`, saturating on overflow.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(63))
        .min(max_delay_ms)
}

/// Calculate backoff delay with explicit randomness.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG. The capped
/// exponential delay is scaled by `1 + (random * 2 - 1) * jitter_factor`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let capped = calculate_backoff_delay(attempt, base_delay_ms, max_delay_ms);
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    ((capped as f64) * jitter).round().max(0.0) as u64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
