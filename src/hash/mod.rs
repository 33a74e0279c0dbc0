//! Seeded hash families for sketch rows.
//!
//! Every sketch owns a family of independent hash functions, one per row,
//! drawn from XXH3 with per-row seeds. XXH3 passes SMHasher cleanly and
//! different seeds give effectively independent functions, which is all a
//! universal-hash consumer needs here.
//!
//! Seeds are derived deterministically from a base seed, so two runs over
//! the same stream place every flow in the same cells. That determinism
//! is what makes epochs reproducible and the integration tests exact.
//!
//! # Examples
//!
//! ```
//! use countcraft::hash::HashFamily;
//!
//! let rows = HashFamily::new(0xC0FFEE, 4);
//! let i = rows.index(0, b"10.0.0.1:443", 1021);
//! assert!(i < 1021);
//! // same row, same key, same slot
//! assert_eq!(i, rows.index(0, b"10.0.0.1:443", 1021));
//! // other rows land independently
//! let j = rows.index(1, b"10.0.0.1:443", 1021);
//! let _ = j;
//! ```

use xxhash_rust::xxh3::xxh3_64_with_seed;

/// A family of seeded 64-bit hash functions, one per sketch row.
#[derive(Clone, Debug)]
pub struct HashFamily {
    seeds: Vec<u64>,
}

impl HashFamily {
    /// Builds a family of `rows` functions derived from `base_seed`.
    pub fn new(base_seed: u64, rows: usize) -> Self {
        let seeds = (0..rows as u64)
            .map(|row| xxh3_64_with_seed(&row.to_le_bytes(), base_seed))
            .collect();
        HashFamily { seeds }
    }

    /// Number of functions in the family.
    pub fn rows(&self) -> usize {
        self.seeds.len()
    }

    /// 64-bit hash of `key` under row `row`.
    #[inline]
    pub fn hash(&self, row: usize, key: &[u8]) -> u64 {
        xxh3_64_with_seed(key, self.seeds[row])
    }

    /// Hash of `key` under row `row`, reduced modulo `modulus`.
    #[inline]
    pub fn index(&self, row: usize, key: &[u8], modulus: usize) -> usize {
        debug_assert!(modulus > 0);
        (self.hash(row, key) % modulus as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_independent() {
        let family = HashFamily::new(42, 8);
        let hashes: Vec<u64> = (0..8).map(|r| family.hash(r, b"flow")).collect();
        let mut deduped = hashes.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), hashes.len());
    }

    #[test]
    fn seeding_is_deterministic() {
        let a = HashFamily::new(7, 3);
        let b = HashFamily::new(7, 3);
        assert_eq!(a.hash(2, b"key"), b.hash(2, b"key"));
        let c = HashFamily::new(8, 3);
        assert_ne!(a.hash(2, b"key"), c.hash(2, b"key"));
    }
}
