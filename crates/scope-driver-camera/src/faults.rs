//! Capture fault injection for the simulated camera.
//!
//! Lets tests and demos exercise the live loop's failure path: either every
//! capture after the first `n` fails, or each capture fails with a fixed
//! probability drawn from a seeded ChaCha RNG so runs are reproducible.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scope_core::error::{AppResult, DaqError};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Serializable fault settings, usually the `[camera.faults]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FaultConfig {
    /// Let this many captures succeed, then fail every later one.
    #[serde(default)]
    pub fail_after: Option<u64>,

    /// Probability (0.0 to 1.0) that any single capture fails.
    #[serde(default)]
    pub failure_rate: f64,

    /// RNG seed for `failure_rate`. Unseeded draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl FaultConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            anyhow::bail!(
                "faults.failure_rate must be within [0, 1], got {}",
                self.failure_rate
            );
        }
        Ok(())
    }
}

/// Runtime fault injector shared by every capture of one source.
#[derive(Debug)]
pub struct CaptureFaults {
    fail_after: Option<u64>,
    failure_rate: f64,
    seed: Option<u64>,
    rng: Mutex<ChaCha8Rng>,
    captures: AtomicU64,
}

impl CaptureFaults {
    /// No injected failures.
    pub fn none() -> Self {
        Self::from_config(&FaultConfig::default())
    }

    pub fn fail_after(successes: u64) -> Self {
        Self::from_config(&FaultConfig {
            fail_after: Some(successes),
            ..Default::default()
        })
    }

    pub fn random_seeded(rate: f64, seed: u64) -> Self {
        Self::from_config(&FaultConfig {
            failure_rate: rate,
            seed: Some(seed),
            ..Default::default()
        })
    }

    pub fn from_config(config: &FaultConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            fail_after: config.fail_after,
            failure_rate: config.failure_rate.clamp(0.0, 1.0),
            seed: config.seed,
            rng: Mutex::new(rng),
            captures: AtomicU64::new(0),
        }
    }

    /// Settings to rebuild an equivalent injector, counter reset.
    pub fn config(&self) -> FaultConfig {
        FaultConfig {
            fail_after: self.fail_after,
            failure_rate: self.failure_rate,
            seed: self.seed,
        }
    }

    /// Count one capture attempt and decide whether it fails.
    pub fn check(&self) -> AppResult<()> {
        let attempt = self.captures.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(limit) = self.fail_after {
            if attempt > limit {
                return Err(DaqError::Capture(format!(
                    "injected failure after {} captures",
                    limit
                )));
            }
        }

        if self.failure_rate > 0.0 {
            let roll: f64 = self
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .r#gen();
            if roll < self.failure_rate {
                return Err(DaqError::Capture(format!(
                    "injected random failure on capture {}",
                    attempt
                )));
            }
        }

        Ok(())
    }
}

impl Default for CaptureFaults {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_fails() {
        let faults = CaptureFaults::none();
        assert!((0..100).all(|_| faults.check().is_ok()));
    }

    #[test]
    fn fail_after_counts_successes() {
        let faults = CaptureFaults::fail_after(2);
        assert!(faults.check().is_ok());
        assert!(faults.check().is_ok());
        assert!(matches!(faults.check(), Err(DaqError::Capture(_))));
        assert!(faults.check().is_err());
    }

    #[test]
    fn seeded_failures_are_reproducible() {
        let a = CaptureFaults::random_seeded(0.5, 1234);
        let b = CaptureFaults::random_seeded(0.5, 1234);
        let ra: Vec<bool> = (0..32).map(|_| a.check().is_ok()).collect();
        let rb: Vec<bool> = (0..32).map(|_| b.check().is_ok()).collect();
        assert_eq!(ra, rb);
        assert!(ra.iter().any(|ok| *ok));
        assert!(ra.iter().any(|ok| !*ok));
    }

    #[test]
    fn rate_outside_unit_interval_is_invalid() {
        let config = FaultConfig {
            failure_rate: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
