//! Exponential backoff with jitter, shared by store writes and reconnects.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::RetryCfg;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Retries after the first attempt; 0 means a single try.
    pub max_attempts: u32,
    /// Delay is randomized by +/- this fraction.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 10,
            jitter_factor: 0.2,
        }
    }
}

impl From<&RetryCfg> for RetryPolicy {
    fn from(cfg: &RetryCfg) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: cfg.max_attempts,
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (0-indexed); attempt 0 never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, JITTER.next_unit())
    }

    /// `jitter` in [0, 1); 0.5 applies no jitter.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = (attempt - 1).min(i32::MAX as u32) as i32;
        let base_us = self.initial_delay.as_micros() as f64 * self.multiplier.powi(exp);
        let base_us = base_us.min(self.max_delay.as_micros() as f64);

        let offset = (jitter * 2.0 - 1.0) * base_us * self.jitter_factor;
        Duration::from_micros((base_us + offset).max(1.0) as u64)
    }
}

/// xorshift64 state; good enough to spread retries, not for anything else.
struct Jitter(AtomicU64);

impl Jitter {
    fn seeded() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self(AtomicU64::new(seed | 1))
    }

    fn next_unit(&self) -> f64 {
        let mut x = self.0.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0.store(x, Ordering::Relaxed);
        (x >> 11) as f64 / (1u64 << 53) as f64
    }
}

static JITTER: Lazy<Jitter> = Lazy::new(Jitter::seeded);

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_attempts: 10,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn first_attempt_is_immediate() {
        assert_eq!(RetryPolicy::default().delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn doubles_until_capped() {
        let p = no_jitter();
        assert_eq!(p.delay_with_jitter(1, 0.5), Duration::from_millis(100));
        assert_eq!(p.delay_with_jitter(2, 0.5), Duration::from_millis(200));
        assert_eq!(p.delay_with_jitter(3, 0.5), Duration::from_millis(400));
        assert_eq!(p.delay_with_jitter(4, 0.5), Duration::from_millis(500));
        assert_eq!(p.delay_with_jitter(60, 0.5), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = RetryPolicy {
            jitter_factor: 0.2,
            ..no_jitter()
        };
        for _ in 0..100 {
            let d = p.delay_for_attempt(1);
            assert!(d >= Duration::from_millis(80), "{d:?}");
            assert!(d <= Duration::from_millis(120), "{d:?}");
        }
    }
}
