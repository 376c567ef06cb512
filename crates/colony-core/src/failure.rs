//! Optional per-tick random task failure.
//!
//! Disabled unless configured with a probability above zero. A seeded policy
//! replays the same sequence of rolls, which keeps failing worlds reproducible
//! in tests and lets a rolled-back tick roll identically when it is retried.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct FailurePolicy {
    probability: f64,
    rng: StdRng,
}

impl FailurePolicy {
    pub fn disabled() -> Self {
        Self {
            probability: 0.0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// `probability` is clamped into `[0, 1]`; NaN disables the policy.
    pub fn new(probability: f64, seed: Option<u64>) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { probability, rng }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn is_enabled(&self) -> bool {
        self.probability > 0.0
    }

    /// Roll once for one running instance.
    pub fn roll(&mut self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.rng.gen_bool(self.probability)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::disabled()
    }
}
