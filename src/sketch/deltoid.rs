//! Deltoid over shared counters.
//!
//! Each of `rows × groups` buckets holds one virtual counter per key
//! bit; an update adds its weight to the counters of the key's one-bits.
//! A local per-bucket sum array (kept outside the pool; it is read
//! during recovery as the bucket total, including the zero-bit side)
//! completes the picture: for bit `j`, the one-side count is the
//! counter, the zero-side count is `bucket_sum − counter`.
//!
//! Heavy-hitter recovery walks every bucket whose total exceeds the
//! threshold and votes bit by bit: exactly one side of each bit must be
//! heavy, and the heavy sides spell out the flow key.

use std::collections::HashSet;

use crate::core::flow::FlowKey;
use crate::core::value::CounterValue;
use crate::error::{CountCraftError, Result};
use crate::hash::HashFamily;
use crate::pool::CounterPool;
use crate::sketch::PoolSketch;
use crate::util::next_prime;

/// Deltoid sketch adapter.
#[derive(Debug)]
pub struct Deltoid<const L: usize, T: CounterValue> {
    rows: usize,
    groups: usize,
    offset: usize,
    /// Per-bucket totals, `rows × groups`, outside the pool.
    sums: Vec<T>,
    hashes: HashFamily,
}

impl<const L: usize, T: CounterValue> Deltoid<L, T> {
    /// Number of tracked bit positions per bucket.
    const NBITS: usize = FlowKey::<L>::BIT_LEN;

    /// Creates a Deltoid with `rows` hash rows of `groups` buckets each;
    /// `groups` is rounded up to a prime.
    pub fn new(rows: usize, groups: usize, seed: u64) -> Result<Self> {
        if rows == 0 || groups == 0 {
            return Err(CountCraftError::invalid_parameters(
                "deltoid rows and groups must be positive",
            ));
        }
        let groups = next_prime(groups);
        Ok(Deltoid {
            rows,
            groups,
            offset: 0,
            sums: vec![T::ZERO; rows * groups],
            hashes: HashFamily::new(seed, rows),
        })
    }

    /// The prime group count actually in use.
    pub fn groups(&self) -> usize {
        self.groups
    }

    #[inline]
    fn bucket(&self, row: usize, key: &FlowKey<L>) -> usize {
        row * self.groups + self.hashes.index(row, key.as_bytes(), self.groups)
    }

    /// Virtual index of bit `bit` in `bucket`.
    #[inline]
    fn bit_idx(&self, bucket: usize, bit: usize) -> usize {
        self.offset + bucket * Self::NBITS + bit
    }
}

impl<const L: usize, T: CounterValue> PoolSketch<L, T> for Deltoid<L, T> {
    fn name(&self) -> &'static str {
        "DT"
    }

    fn cnt_num(&self) -> usize {
        self.rows * self.groups * Self::NBITS
    }

    fn bind(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn on_record(&mut self, pool: &mut CounterPool<T>, key: &FlowKey<L>, weight: T) {
        for row in 0..self.rows {
            let bucket = self.bucket(row, key);
            for bit in 0..Self::NBITS {
                if key.bit(bit) {
                    pool.update(self.bit_idx(bucket, bit), weight);
                }
            }
            self.sums[bucket] = self.sums[bucket].add(weight);
        }
    }

    fn query(&self, pool: &CounterPool<T>, key: &FlowKey<L>) -> T {
        let mut min_val = T::MAX;
        for row in 0..self.rows {
            let bucket = self.bucket(row, key);
            for bit in 0..Self::NBITS {
                let one_side = pool.query(self.bit_idx(bucket, bit));
                let side = if key.bit(bit) {
                    one_side
                } else {
                    T::from_i64(self.sums[bucket].to_i64() - one_side.to_i64())
                };
                min_val = min_val.min(side);
            }
        }
        min_val
    }

    fn heavy_hitters(&self, pool: &CounterPool<T>, threshold: f64) -> Vec<(FlowKey<L>, T)> {
        let thresh = T::from_f64(threshold);
        let mut seen = HashSet::new();
        let mut hitters = Vec::new();
        for bucket in 0..self.rows * self.groups {
            if self.sums[bucket] <= thresh {
                // no heavy hitter can hide in a light bucket
                continue;
            }
            let total = self.sums[bucket].to_i64();
            let mut key = FlowKey::<L>::default();
            let mut reject = false;
            for bit in 0..Self::NBITS {
                let cnt1 = pool.query(self.bit_idx(bucket, bit)).to_i64();
                let cnt0 = total - cnt1;
                let one_heavy = cnt1 > thresh.to_i64();
                let zero_heavy = cnt0 > thresh.to_i64();
                if one_heavy == zero_heavy {
                    reject = true;
                    break;
                }
                if one_heavy {
                    key.set_bit(bit, true);
                }
            }
            if !reject && seen.insert(key) {
                let estimate = self.query(pool, &key);
                hitters.push((key, estimate));
            }
        }
        hitters
    }

    fn reset(&mut self) {
        self.sums.fill(T::ZERO);
    }
}
