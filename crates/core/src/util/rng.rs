//! Seeded randomness for failure decisions and role selection.
//!
//! All random draws of an experiment go through a [`Randomness`] so a run can be
//! replayed from its seed and tests can script the exact draws they need.

use std::ops::RangeInclusive;

use rand::{rngs::SmallRng, Rng, SeedableRng};

pub trait Randomness: Send {
    /// Uniform integer in the inclusive range.
    fn roll(&mut self, range: RangeInclusive<u32>) -> u32;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn pick(&mut self, len: usize) -> usize;
}

pub struct SeededRandomness {
    inner: SmallRng,
    seed: u64,
}

impl SeededRandomness {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: SmallRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Uses the given seed, or a fresh one from the OS.
    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        use rand::RngCore;
        Self::new(seed.unwrap_or_else(|| rand::rngs::OsRng.next_u64()))
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Randomness for SeededRandomness {
    fn roll(&mut self, range: RangeInclusive<u32>) -> u32 {
        self.inner.gen_range(range)
    }

    fn pick(&mut self, len: usize) -> usize {
        self.inner.gen_range(0..len)
    }
}

impl std::fmt::Debug for SeededRandomness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRandomness")
            .field("seed", &self.seed)
            .finish()
    }
}
