//! Reconnection backoff.

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use st_core::config::BackoffConfig;
use st_core::error::{StError, StResult};

/// Delay source for reconnect attempts.
pub trait BackoffPolicy: Send + Sync {
    /// Delay before the next attempt. Advances the attempt counter.
    fn next_delay(&self) -> Duration;

    /// Start over from the first-attempt delay.
    fn reset(&self);
}

/// `min(base * multiplier^attempts, max)` with symmetric jitter applied to
/// the capped value.
///
/// The attempt counter is the only mutable state and sits behind its own
/// lock, so `reset` may race `next_delay` freely.
#[derive(Debug)]
pub struct ExponentialBackoff {
    base_ms: f64,
    max_ms: f64,
    multiplier: f64,
    jitter: f64,
    attempts: Mutex<u32>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, multiplier: f64, jitter: f64) -> StResult<Self> {
        if base > max {
            return Err(StError::InvalidArgument(
                "backoff base delay exceeds max delay".into(),
            ));
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(StError::InvalidArgument(
                "backoff multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..1.0).contains(&jitter) {
            return Err(StError::InvalidArgument(
                "backoff jitter must be in [0.0, 1.0)".into(),
            ));
        }
        Ok(Self {
            base_ms: base.as_millis() as f64,
            max_ms: max.as_millis() as f64,
            multiplier,
            jitter,
            attempts: Mutex::new(0),
        })
    }

    pub fn from_config(config: &BackoffConfig) -> StResult<Self> {
        Self::new(
            Duration::from_millis(config.base_ms),
            Duration::from_millis(config.max_ms),
            config.multiplier,
            config.jitter,
        )
    }

    /// Attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock()
    }

    /// Delay for `attempt` before jitter.
    fn capped_ms(&self, attempt: u32) -> f64 {
        let exp = attempt.min(i32::MAX as u32) as i32;
        // powi overflows to infinity, which the cap absorbs.
        (self.base_ms * self.multiplier.powi(exp)).min(self.max_ms)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_ms: 1_000.0,
            max_ms: 30_000.0,
            multiplier: 2.0,
            jitter: 0.2,
            attempts: Mutex::new(0),
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self) -> Duration {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let current = *attempts;
            *attempts = current.saturating_add(1);
            current
        };

        let capped = self.capped_ms(attempt);
        let delay = if self.jitter > 0.0 && capped > 0.0 {
            let spread = capped * self.jitter;
            rand::thread_rng().gen_range((capped - spread)..=(capped + spread))
        } else {
            capped
        };

        Duration::from_millis(delay.max(0.0).round() as u64)
    }

    fn reset(&self) {
        *self.attempts.lock() = 0;
    }
}
