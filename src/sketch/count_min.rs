//! Count-Min over shared counters.
//!
//! The classic `depth × width` grid, except the cells are virtual
//! counters in the shared pool instead of a private array. The width is
//! forced to a prime so row hashes reduced modulo the width spread
//! evenly.

use crate::core::flow::FlowKey;
use crate::core::value::CounterValue;
use crate::error::{CountCraftError, Result};
use crate::hash::HashFamily;
use crate::pool::CounterPool;
use crate::sketch::PoolSketch;
use crate::util::next_prime;

/// Count-Min sketch adapter.
#[derive(Debug)]
pub struct CountMin<const L: usize> {
    depth: usize,
    width: usize,
    offset: usize,
    hashes: HashFamily,
}

impl<const L: usize> CountMin<L> {
    /// Creates a `depth`-row sketch; `width` is rounded up to a prime.
    pub fn new(depth: usize, width: usize, seed: u64) -> Result<Self> {
        if depth == 0 || width == 0 {
            return Err(CountCraftError::invalid_parameters(
                "count-min depth and width must be positive",
            ));
        }
        let width = next_prime(width);
        Ok(CountMin {
            depth,
            width,
            offset: 0,
            hashes: HashFamily::new(seed, depth),
        })
    }

    /// The prime row width actually in use.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Virtual index of `key` in row `row`.
    #[inline]
    fn index(&self, row: usize, key: &FlowKey<L>) -> usize {
        self.offset + row * self.width + self.hashes.index(row, key.as_bytes(), self.width)
    }
}

impl<const L: usize, T: CounterValue> PoolSketch<L, T> for CountMin<L> {
    fn name(&self) -> &'static str {
        "CM"
    }

    fn cnt_num(&self) -> usize {
        self.depth * self.width
    }

    fn bind(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn on_record(&mut self, pool: &mut CounterPool<T>, key: &FlowKey<L>, weight: T) {
        for row in 0..self.depth {
            pool.update(self.index(row, key), weight);
        }
    }

    fn query(&self, pool: &CounterPool<T>, key: &FlowKey<L>) -> T {
        let mut min_val = T::MAX;
        for row in 0..self.depth {
            min_val = min_val.min(pool.query(self.index(row, key)));
        }
        min_val
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn width_is_forced_prime() {
        let cm = CountMin::<13>::new(4, 1000, 1).unwrap();
        assert_eq!(cm.width(), 1009);
        assert_eq!(
            <CountMin<13> as PoolSketch<13, i64>>::cnt_num(&cm),
            4 * 1009
        );
    }

    #[test]
    fn single_group_pool_counts_exactly() {
        let mut cm = CountMin::<4>::new(3, 64, 7).unwrap();
        let n = <CountMin<4> as PoolSketch<4, i64>>::cnt_num(&cm);
        let mut pool: CounterPool<i64> =
            CounterPool::with_config(&PoolConfig::new(n, n, 1).unwrap()).unwrap();
        PoolSketch::<4, i64>::bind(&mut cm, 0);

        let hot = FlowKey::new([1, 2, 3, 4]);
        let cold = FlowKey::new([9, 9, 9, 9]);
        for _ in 0..50 {
            cm.on_record(&mut pool, &hot, 2);
        }
        cm.on_record(&mut pool, &cold, 5);
        pool.restore();

        assert_eq!(cm.query(&pool, &hot), 100);
        assert_eq!(cm.query(&pool, &cold), 5);
    }
}
