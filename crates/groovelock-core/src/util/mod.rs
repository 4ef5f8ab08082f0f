//! Determinism utilities: the frozen RNG and the stable hash.

mod hash;
mod rng;

pub use hash::{StableHash, HASH_VERSION};
pub use rng::{StableRng, RNG_VERSION};
