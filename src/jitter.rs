//! Multiplicative jitter to keep clients from retrying in lockstep.
//!
//! A jitter fraction `j` in `[0, 1]` shrinks a delay by a uniformly drawn share of itself:
//! `delay × (1 − U[0, j])`. With `j = 0` no randomness is drawn at all; with `j = 1` ("full
//! jitter") the delay lands anywhere in `[0, delay]`.
//!
//! RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//! `apply_with_rng`.
//!
//! Example:
//! ```rust
//! use stormguard::Jitter;
//! use std::time::Duration;
//!
//! let jitter = Jitter::fraction(0.25).unwrap();
//! let delay = jitter.apply(Duration::from_millis(100));
//! assert!(delay >= Duration::from_millis(75) && delay <= Duration::from_millis(100));
//! ```

use crate::error::ConfigError;
use rand::{rng, Rng};
use std::time::Duration;

/// Validated jitter fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "f64", into = "f64"))]
pub struct Jitter {
    fraction: f64,
}

impl Jitter {
    /// Deterministic delays.
    pub const fn none() -> Self {
        Self { fraction: 0.0 }
    }

    /// Uniform in `[0, delay]`.
    pub const fn full() -> Self {
        Self { fraction: 1.0 }
    }

    pub fn fraction(fraction: f64) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::JitterOutOfRange(fraction));
        }
        Ok(Self { fraction })
    }

    pub fn as_fraction(&self) -> f64 {
        self.fraction
    }

    /// Draw the share of the delay to remove, uniform over `[0, fraction]`.
    pub fn draw_with_rng<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.fraction == 0.0 {
            return 0.0;
        }
        rng.random_range(0.0..=self.fraction)
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let draw = self.draw_with_rng(rng);
        if draw == 0.0 {
            return delay;
        }
        // Floor keeps the jittered delay from ever exceeding the raw one.
        let nanos = (delay.as_nanos() as f64 * (1.0 - draw)).floor();
        Duration::from_nanos(nanos.clamp(0.0, u64::MAX as f64) as u64)
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::full()
    }
}

impl TryFrom<f64> for Jitter {
    type Error = ConfigError;

    fn try_from(fraction: f64) -> Result<Self, Self::Error> {
        Self::fraction(fraction)
    }
}

impl From<Jitter> for f64 {
    fn from(jitter: Jitter) -> Self {
        jitter.fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_jitter_returns_exact_delay() {
        let delay = Duration::from_millis(1234);
        assert_eq!(Jitter::none().apply(delay), delay);
    }

    #[test]
    fn full_jitter_is_between_zero_and_delay() {
        let jitter = Jitter::full();
        let delay = Duration::from_secs(1);
        for _ in 0..200 {
            assert!(jitter.apply(delay) <= delay);
        }
    }

    #[test]
    fn partial_jitter_keeps_floor() {
        let jitter = Jitter::fraction(0.5).unwrap();
        let delay = Duration::from_secs(1);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let jittered = jitter.apply_with_rng(delay, &mut rng);
            assert!(jittered <= delay);
            assert!(jittered >= Duration::from_millis(500) - Duration::from_nanos(1));
        }
    }

    #[test]
    fn draws_stay_within_fraction() {
        let jitter = Jitter::fraction(0.3).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let draw = jitter.draw_with_rng(&mut rng);
            assert!((0.0..=0.3).contains(&draw));
        }
    }

    #[test]
    fn rejects_out_of_range_fractions() {
        assert_eq!(Jitter::fraction(1.5), Err(ConfigError::JitterOutOfRange(1.5)));
        assert_eq!(Jitter::fraction(-0.1), Err(ConfigError::JitterOutOfRange(-0.1)));
        assert!(Jitter::fraction(f64::NAN).is_err());
        assert!(Jitter::fraction(0.0).is_ok());
        assert!(Jitter::fraction(1.0).is_ok());
    }

    #[test]
    fn jitter_handles_zero_delay() {
        assert_eq!(Jitter::full().apply(Duration::ZERO), Duration::ZERO);
    }
}
