//! Seeded linear congruential generator.
//!
//! ```text
//! state' = (state * 9301 + 49297) mod 233280
//! output = state' / 233280
//! ```
//!
//! One generator is seeded per compile and threaded through the whole tree,
//! so siblings draw successive values from a single stream.

/// LCG multiplier.
pub const LCG_MULTIPLIER: u64 = 9301;
/// LCG increment.
pub const LCG_INCREMENT: u64 = 49297;
/// LCG modulus.
pub const LCG_MODULUS: u64 = 233_280;

/// Deterministic pseudo-random stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeededRandom {
    state: u64,
}

impl SeededRandom {
    /// Create a generator seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Current internal state.
    pub fn state(&self) -> u64 {
        self.state
    }

    /// Restore a previously observed state.
    pub(crate) fn set_state(&mut self, state: u64) {
        self.state = state;
    }

    /// Next value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        // Reducing first keeps the product in range; the residue is unchanged.
        self.state = ((self.state % LCG_MODULUS) * LCG_MULTIPLIER + LCG_INCREMENT) % LCG_MODULUS;
        self.state as f64 / LCG_MODULUS as f64
    }

    /// Draw `floor(next * len)`. Returns `None` without drawing when `len == 0`.
    pub fn pick_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let index = (self.next_f64() * len as f64).floor() as usize;
        Some(index.min(len - 1))
    }
}
