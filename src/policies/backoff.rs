//! # Exponential backoff between spooler reconnects.
//!
//! The delay before reconnect attempt `n` (0-indexed) is `first × factor^n`,
//! clamped to `max`, then jittered. The base is derived from the attempt
//! number alone, so jitter never compounds across attempts.
//!
//! There is no elapsed-time cut-off: a spooler keeps retrying
//! until its governing token is cancelled.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use remoteops::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(500),
//!     max: Duration::from_secs(60),
//!     factor: 1.5,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(500));
//! assert_eq!(backoff.next(1), Duration::from_millis(750));
//! assert_eq!(backoff.next(40), Duration::from_secs(60));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Reconnect backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect.
    pub first: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0`).
    pub factor: f64,
    /// Randomization applied to each delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `first = 500ms`;
    /// - `factor = 1.5`;
    /// - `max = 60s`;
    /// - `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(60),
            factor: 1.5,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Fixed delay without jitter; handy in tests.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay before reconnect attempt `attempt` (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}
