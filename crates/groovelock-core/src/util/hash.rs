//! Canonical deterministic hash.
//!
//! Natural-language keys (chord text, preset keys, agent names) are turned
//! into selection seeds with FNV-1a 32-bit. Host string hashers are not stable
//! across runs or implementations and must not be used for musical decisions.
//!
//! Seeds are derived from a namespaced string, e.g.
//! `"humanize|Piano|jazz_swing_medium"`; see [`StableHash::seed_for`].

/// Behavior version of [`StableHash`]. Bump only for an intentional change.
pub const HASH_VERSION: u32 = 1;

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Stable, version-tagged FNV-1a hashing.
pub struct StableHash;

impl StableHash {
    /// FNV-1a 32-bit over raw bytes.
    pub fn fnv1a32(bytes: &[u8]) -> u32 {
        bytes.iter().fold(FNV_OFFSET, |h, &b| {
            (h ^ b as u32).wrapping_mul(FNV_PRIME)
        })
    }

    /// FNV-1a 32-bit over the UTF-8 bytes of `text`.
    pub fn fnv1a32_str(text: &str) -> u32 {
        Self::fnv1a32(text.as_bytes())
    }

    /// Mix two values (and the hash version) into one.
    pub fn mix(a: u32, b: u32) -> u32 {
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&HASH_VERSION.to_le_bytes());
        bytes[4..8].copy_from_slice(&a.to_le_bytes());
        bytes[8..].copy_from_slice(&b.to_le_bytes());
        Self::fnv1a32(&bytes)
    }

    /// Seed from namespaced parts joined with `|`.
    pub fn seed_for(parts: &[&str]) -> u32 {
        Self::fnv1a32_str(&parts.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv_reference_values() {
        assert_eq!(StableHash::fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(StableHash::fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(StableHash::fnv1a32_str("Cmaj7"), 0x4399_fe67);
        assert_eq!(StableHash::fnv1a32_str("jazz_swing_2to1"), 0x0a92_3e90);
    }

    #[test]
    fn test_mix_is_frozen() {
        assert_eq!(HASH_VERSION, 1);
        assert_eq!(StableHash::mix(1, 2), 0x0c69_cfc7);
        assert_ne!(StableHash::mix(1, 2), StableHash::mix(2, 1));
    }

    #[test]
    fn test_seed_for_joins_with_pipe() {
        assert_eq!(
            StableHash::seed_for(&["humanize", "Piano", "12"]),
            StableHash::fnv1a32_str("humanize|Piano|12")
        );
    }
}
