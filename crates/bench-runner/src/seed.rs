//! Per-run seed derivation for input generation.
//!
//! The base seed only ever reaches the input-generation stage. Key generation
//! keeps its own entropy so repeated benchmark runs never reuse key material.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Derived seeds are drawn from `[0, MAX_RUN_SEED)`, the positive `i32` range
/// that every collaborator accepts.
pub const MAX_RUN_SEED: u64 = 0x7fff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSeed {
    /// No base seed; the stage picks its own randomness.
    Default,
    Derived(u64),
}

impl RunSeed {
    pub fn value(self) -> Option<u64> {
        match self {
            RunSeed::Default => None,
            RunSeed::Derived(seed) => Some(seed),
        }
    }

    /// Trailing arguments for the input-generation stage.
    pub fn stage_args(self) -> Vec<String> {
        match self {
            RunSeed::Default => Vec::new(),
            RunSeed::Derived(seed) => vec!["--seed".to_string(), seed.to_string()],
        }
    }
}

/// Sequential per-run seeds, instantiated once per invocation.
///
/// ChaCha8 has a fixed output stream across `rand_chacha` releases, so a base
/// seed maps to the same run seeds regardless of which build produced them.
#[derive(Debug, Clone)]
pub struct SeedSchedule {
    rng: Option<ChaCha8Rng>,
}

impl SeedSchedule {
    pub fn new(base_seed: Option<u64>) -> Self {
        Self {
            rng: base_seed.map(ChaCha8Rng::seed_from_u64),
        }
    }

    /// Seed for the next run; the n-th call serves run index n.
    pub fn next_run_seed(&mut self) -> RunSeed {
        match self.rng.as_mut() {
            Some(rng) => RunSeed::Derived(u64::from(rng.next_u32()) % MAX_RUN_SEED),
            None => RunSeed::Default,
        }
    }
}

/// Seed for the 1-based `run_index`, identical to what a fresh
/// [`SeedSchedule`] hands out on its `run_index`-th call.
pub fn derive_run_seed(base_seed: Option<u64>, run_index: usize) -> RunSeed {
    let mut schedule = SeedSchedule::new(base_seed);
    let mut seed = schedule.next_run_seed();
    for _ in 1..run_index {
        seed = schedule.next_run_seed();
    }
    seed
}
