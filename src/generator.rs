//! Synthetic sample source.
//!
//! Produces uniformly distributed `f32` samples in a configured half-open
//! range. Each session owns its own generator; nothing is shared.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Half-open amplitude range `[min, max)` for generated samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRange {
    pub min: f32,
    pub max: f32,
}

impl SampleRange {
    /// Unit range `[0, 1)`.
    pub const UNIT: SampleRange = SampleRange { min: 0.0, max: 1.0 };

    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Both bounds finite and `min < max`.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min < self.max
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value < self.max
    }
}

/// Pseudo-random sample generator.
#[derive(Debug)]
pub struct SampleGenerator {
    rng: StdRng,
    dist: Uniform<f32>,
}

impl SampleGenerator {
    /// Create a generator over `range`, seeded from entropy unless `seed` is given.
    ///
    /// `range` must satisfy [`SampleRange::is_valid`]; configuration loading
    /// rejects anything else.
    pub fn new(range: SampleRange, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            dist: Uniform::new(range.min, range.max),
        }
    }

    /// Produce `n` samples. `n == 0` yields an empty vector.
    pub fn generate(&mut self, n: usize) -> Vec<f32> {
        let mut samples = Vec::with_capacity(n);
        samples.extend((&self.dist).sample_iter(&mut self.rng).take(n));
        samples
    }
}
