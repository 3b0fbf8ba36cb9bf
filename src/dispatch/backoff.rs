//! Exponential backoff between attempts.
//!
//! K_i: The delay after failed attempt index i (0-based) is unit * 2^(i+2).
//! I^B: Many units failing together retry together unless jitter is on.

use crate::models::DispatchConfig;
use rand::Rng;
use std::time::Duration;

/// Backoff policy shared by every unit of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    unit: Duration,
    jitter: bool,
}

impl Default for Backoff {
    /// One-second unit, no jitter: 4s, 8s, 16s, ...
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            jitter: false,
        }
    }
}

impl Backoff {
    pub fn new(unit: Duration) -> Self {
        Self {
            unit,
            jitter: false,
        }
    }

    /// Add a uniform random `[0, delay)` on top of each delay.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(Duration::from_millis(config.backoff_unit_ms)).with_jitter(config.jitter)
    }

    pub fn unit(&self) -> Duration {
        self.unit
    }

    pub fn has_jitter(&self) -> bool {
        self.jitter
    }

    /// Deterministic delay after failed attempt `attempt_index` (0-based).
    pub fn base_delay(&self, attempt_index: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt_index.saturating_add(2));
        self.unit.saturating_mul(factor)
    }

    /// Delay to sleep, including jitter when enabled.
    pub fn delay<R>(&self, attempt_index: u32, rng: &mut R) -> Duration
    where
        R: Rng + ?Sized,
    {
        let base = self.base_delay(attempt_index);
        if !self.jitter || base.is_zero() {
            return base;
        }
        base.saturating_add(base.mul_f64(rng.random::<f64>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_default_schedule() {
        let backoff = Backoff::default();
        assert_eq!(backoff.base_delay(0), Duration::from_secs(4));
        assert_eq!(backoff.base_delay(1), Duration::from_secs(8));
        assert_eq!(backoff.base_delay(2), Duration::from_secs(16));
    }

    #[test]
    fn test_no_jitter_is_deterministic() {
        let backoff = Backoff::new(Duration::from_millis(1));
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(backoff.delay(3, &mut rng), Duration::from_millis(32));
    }

    #[test]
    fn test_jitter_stays_within_one_base_delay() {
        let backoff = Backoff::new(Duration::from_millis(10)).with_jitter(true);
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..100 {
            let delay = backoff.delay(0, &mut rng);
            assert!(delay >= Duration::from_millis(40));
            assert!(delay < Duration::from_millis(80));
        }
    }

    #[test]
    fn test_huge_attempt_index_saturates() {
        let backoff = Backoff::default();
        assert_eq!(
            backoff.base_delay(u32::MAX),
            Duration::from_secs(u64::from(u32::MAX))
        );
    }

    #[test]
    fn test_from_config() {
        let config = DispatchConfig {
            backoff_unit_ms: 250,
            jitter: true,
        };
        let backoff = Backoff::from_config(&config);
        assert_eq!(backoff.unit(), Duration::from_millis(250));
        assert!(backoff.has_jitter());
    }
}
