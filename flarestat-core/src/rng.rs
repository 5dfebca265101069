//! Deterministic RNG hierarchy.
//!
//! A master seed yields one sub-seed per `(stream, index)` pair, derived by
//! BLAKE3 hashing. Derivation does not depend on call order, so resampling
//! fanned out over a rayon pool gives identical results for any thread count.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Named streams keep unrelated consumers of one master seed independent.
pub mod streams {
    pub const BOOTSTRAP: &str = "bootstrap";
    pub const PERMUTATION: &str = "permutation";
    pub const REALIZATIONS: &str = "realizations";
    pub const FOLDS: &str = "folds";
    pub const AUGMENTATION: &str = "augmentation";
    pub const POSTERIOR: &str = "posterior";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    /// Sub-seed for `(stream, index)`.
    pub fn sub_seed(&self, stream: &str, index: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(stream.as_bytes());
        hasher.update(&index.to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Seeded `StdRng` for `(stream, index)`.
    pub fn rng_for(&self, stream: &str, index: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(stream, index))
    }
}
