//! HashPipe over shared counters.
//!
//! A pipeline of `depth` stages, each a `width`-slot table of resident
//! flow keys. A new flow always claims its stage-0 slot; the evicted
//! resident is carried down the pipe and settles wherever it beats the
//! smallest counter it meets. Slot keys stay local; slot counts are
//! virtual counters in the pool.
//!
//! Eviction needs two things the routed update path cannot give: the
//! current value of a slot mid-stream, and an in-place correction of
//! that exact slot. Those are the pool's [`est_slot`] and
//! [`uniform_update`] hooks. The estimate reads the minimum over the
//! slot's group views and the correction is applied to the physical slot
//! that produced the minimum, so the adjustment lands where the reading
//! was taken. The accounting assumes the shadow channel is off; run
//! HashPipe pools with `shadow_bits = 0`.
//!
//! [`est_slot`]: crate::pool::CounterPool::est_slot
//! [`uniform_update`]: crate::pool::CounterPool::uniform_update

use std::collections::HashSet;

use crate::core::flow::FlowKey;
use crate::core::value::CounterValue;
use crate::error::{CountCraftError, Result};
use crate::hash::HashFamily;
use crate::pool::CounterPool;
use crate::sketch::PoolSketch;
use crate::util::next_prime;

/// HashPipe sketch adapter.
#[derive(Debug)]
pub struct HashPipe<const L: usize> {
    depth: usize,
    width: usize,
    offset: usize,
    /// Resident keys, `depth × width`, all-zero key = empty slot.
    keys: Vec<FlowKey<L>>,
    hashes: HashFamily,
}

impl<const L: usize> HashPipe<L> {
    /// Creates a `depth`-stage pipe; `width` is rounded up to a prime.
    pub fn new(depth: usize, width: usize, seed: u64) -> Result<Self> {
        if depth == 0 || width == 0 {
            return Err(CountCraftError::invalid_parameters(
                "hashpipe depth and width must be positive",
            ));
        }
        let width = next_prime(width);
        Ok(HashPipe {
            depth,
            width,
            offset: 0,
            keys: vec![FlowKey::default(); depth * width],
            hashes: HashFamily::new(seed, depth),
        })
    }

    /// The prime stage width actually in use.
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    fn cell(&self, stage: usize, key: &FlowKey<L>) -> usize {
        stage * self.width + self.hashes.index(stage, key.as_bytes(), self.width)
    }
}

impl<const L: usize, T: CounterValue> PoolSketch<L, T> for HashPipe<L> {
    fn name(&self) -> &'static str {
        "HP"
    }

    fn cnt_num(&self) -> usize {
        self.depth * self.width
    }

    fn bind(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn on_record(&mut self, pool: &mut CounterPool<T>, key: &FlowKey<L>, weight: T) {
        // stage 0: the incoming flow always wins the slot
        let cell = self.cell(0, key);
        let v = self.offset + cell;
        if self.keys[cell] == *key {
            pool.update(v, weight);
            return;
        }
        if self.keys[cell].is_empty() {
            self.keys[cell] = *key;
            pool.update(v, weight);
            return;
        }
        let (evicted, slot) = pool.est_slot(v);
        let mut carry_key = self.keys[cell];
        let mut carry_val = evicted;
        self.keys[cell] = *key;
        pool.uniform_update(slot, T::from_i64(weight.to_i64() - evicted.to_i64()));

        // later stages: the carried flow only displaces a smaller resident
        for stage in 1..self.depth {
            let cell = self.cell(stage, &carry_key);
            let v = self.offset + cell;
            if self.keys[cell] == carry_key {
                pool.update(v, carry_val);
                return;
            }
            if self.keys[cell].is_empty() {
                self.keys[cell] = carry_key;
                pool.update(v, carry_val);
                return;
            }
            let (resident, slot) = pool.est_slot(v);
            if resident < carry_val {
                std::mem::swap(&mut self.keys[cell], &mut carry_key);
                pool.uniform_update(slot, T::from_i64(carry_val.to_i64() - resident.to_i64()));
                carry_val = resident;
            }
        }
        // a carry that loses at every stage is dropped
    }

    fn query(&self, pool: &CounterPool<T>, key: &FlowKey<L>) -> T {
        let mut total = 0i64;
        for stage in 0..self.depth {
            let cell = self.cell(stage, key);
            if self.keys[cell] == *key {
                total += pool.query(self.offset + cell).to_i64();
            }
        }
        T::from_i64(total)
    }

    fn heavy_hitters(&self, pool: &CounterPool<T>, threshold: f64) -> Vec<(FlowKey<L>, T)> {
        let mut checked = HashSet::new();
        let mut hitters = Vec::new();
        for key in &self.keys {
            if key.is_empty() || !checked.insert(*key) {
                continue;
            }
            let estimate = self.query(pool, key);
            if estimate.to_f64() >= threshold {
                hitters.push((*key, estimate));
            }
        }
        hitters
    }

    fn reset(&mut self) {
        self.keys.fill(FlowKey::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    fn exact_pool(n: usize) -> CounterPool<i64> {
        CounterPool::with_config(&PoolConfig::new(n, n, 1).unwrap()).unwrap()
    }

    #[test]
    fn resident_flow_counts_exactly() {
        let mut hp = HashPipe::<4>::new(2, 16, 5).unwrap();
        let mut pool = exact_pool(<HashPipe<4> as PoolSketch<4, i64>>::cnt_num(&hp));
        PoolSketch::<4, i64>::bind(&mut hp, 0);

        let key = FlowKey::new([1, 1, 2, 2]);
        for _ in 0..25 {
            hp.on_record(&mut pool, &key, 3);
        }
        pool.restore();
        assert_eq!(hp.query(&pool, &key), 75);
    }

    #[test]
    fn heavy_flow_survives_churn() {
        let mut hp = HashPipe::<4>::new(4, 64, 9).unwrap();
        let mut pool = exact_pool(<HashPipe<4> as PoolSketch<4, i64>>::cnt_num(&hp));
        PoolSketch::<4, i64>::bind(&mut hp, 0);

        let hot = FlowKey::new([200, 1, 2, 3]);
        for i in 0u32..1000 {
            hp.on_record(&mut pool, &hot, 1);
            // a rotating crowd of one-packet flows
            let bytes = (i % 97 + 1).to_le_bytes();
            hp.on_record(&mut pool, &FlowKey::new(bytes), 1);
        }
        pool.restore();

        let hitters = hp.heavy_hitters(&pool, 500.0);
        let hot_entry = hitters.iter().find(|(k, _)| *k == hot);
        assert!(hot_entry.is_some(), "hot flow missing from {hitters:?}");
        assert!(hot_entry.unwrap().1 >= 900);
    }
}
