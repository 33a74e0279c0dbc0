//! Flow Radar over shared counters.
//!
//! A flow filter (a plain bitmap, kept local: bits are not additive
//! counters and have no business in the pool) in front of a count table
//! whose cells each hold a key-XOR accumulator plus two counts: how many
//! distinct flows hashed into the cell and how much mass they carried.
//! Both count regions live in the shared pool; the XOR accumulators stay
//! local.
//!
//! After restoration, flows are recovered by peeling: a cell whose flow
//! count reads 1 holds exactly one flow, whose key is the cell's XOR
//! value; remove that flow from its other cells and repeat. Restored
//! counts are approximate, so peeling simply stops when no cell reads
//! pure; a mis-restored count costs coverage, not correctness of the
//! loop.

use crate::core::flow::FlowKey;
use crate::core::value::CounterValue;
use crate::error::{CountCraftError, Result};
use crate::hash::HashFamily;
use crate::pool::CounterPool;
use crate::sketch::PoolSketch;

/// Flow Radar sketch adapter.
#[derive(Debug)]
pub struct FlowRadar<const L: usize> {
    filter_bits: usize,
    table_size: usize,
    offset: usize,
    filter: Vec<bool>,
    flow_xor: Vec<FlowKey<L>>,
    filter_hashes: HashFamily,
    table_hashes: HashFamily,
}

impl<const L: usize> FlowRadar<L> {
    /// Creates a Flow Radar with a `filter_bits`-bit flow filter probed
    /// by `filter_hash` functions and a `table_size`-cell count table
    /// probed by `table_hash` functions.
    pub fn new(
        filter_bits: usize,
        filter_hash: usize,
        table_size: usize,
        table_hash: usize,
        seed: u64,
    ) -> Result<Self> {
        if filter_bits == 0 || filter_hash == 0 || table_size == 0 || table_hash == 0 {
            return Err(CountCraftError::invalid_parameters(
                "flow radar dimensions must be positive",
            ));
        }
        Ok(FlowRadar {
            filter_bits,
            table_size,
            offset: 0,
            filter: vec![false; filter_bits],
            flow_xor: vec![FlowKey::default(); table_size],
            filter_hashes: HashFamily::new(seed, filter_hash),
            table_hashes: HashFamily::new(seed.wrapping_add(1), table_hash),
        })
    }

    /// Virtual index of cell `c`'s flow count.
    #[inline]
    fn flow_cnt_idx(&self, c: usize) -> usize {
        self.offset + c
    }

    /// Virtual index of cell `c`'s packet count.
    #[inline]
    fn pkt_cnt_idx(&self, c: usize) -> usize {
        self.offset + self.table_size + c
    }

    /// Whether `key` has been seen; inserts it either way.
    fn check_and_insert(&mut self, key: &FlowKey<L>) -> bool {
        let mut seen = true;
        for row in 0..self.filter_hashes.rows() {
            let bit = self.filter_hashes.index(row, key.as_bytes(), self.filter_bits);
            seen &= self.filter[bit];
            self.filter[bit] = true;
        }
        seen
    }

    /// Count-table cells of `key`, deduplicated: a key that hashes into
    /// the same cell twice would XOR-cancel its own signature there.
    fn cells(&self, key: &FlowKey<L>) -> Vec<usize> {
        let mut cells: Vec<usize> = (0..self.table_hashes.rows())
            .map(|row| self.table_hashes.index(row, key.as_bytes(), self.table_size))
            .collect();
        cells.sort_unstable();
        cells.dedup();
        cells
    }

    /// Recovers `(flow, value)` pairs from restored counts by peeling
    /// pure cells.
    pub fn decode<T: CounterValue>(&self, pool: &CounterPool<T>) -> Vec<(FlowKey<L>, T)> {
        let mut flow_cnt: Vec<i64> = (0..self.table_size)
            .map(|c| pool.query(self.flow_cnt_idx(c)).to_i64())
            .collect();
        let mut pkt_cnt: Vec<i64> = (0..self.table_size)
            .map(|c| pool.query(self.pkt_cnt_idx(c)).to_i64())
            .collect();
        let mut xor = self.flow_xor.clone();
        let mut flows = Vec::new();
        loop {
            let Some(c) = (0..self.table_size)
                .find(|&c| flow_cnt[c] == 1 && !xor[c].is_empty())
            else {
                break;
            };
            let key = xor[c];
            let value = pkt_cnt[c].max(0);
            flows.push((key, T::from_i64(value)));
            for cell in self.cells(&key) {
                xor[cell].xor_assign(&key);
                flow_cnt[cell] -= 1;
                pkt_cnt[cell] -= value;
            }
        }
        flows
    }
}

impl<const L: usize, T: CounterValue> PoolSketch<L, T> for FlowRadar<L> {
    fn name(&self) -> &'static str {
        "FR"
    }

    fn cnt_num(&self) -> usize {
        2 * self.table_size
    }

    fn bind(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn on_record(&mut self, pool: &mut CounterPool<T>, key: &FlowKey<L>, weight: T) {
        let seen = self.check_and_insert(key);
        for cell in self.cells(key) {
            if !seen {
                self.flow_xor[cell].xor_assign(key);
                pool.update(self.flow_cnt_idx(cell), T::from_i64(1));
            }
            pool.update(self.pkt_cnt_idx(cell), weight);
        }
    }

    /// Coarse per-flow bound: the minimum packet count over the flow's
    /// cells. [`decode`](FlowRadar::decode) is the real read-out.
    fn query(&self, pool: &CounterPool<T>, key: &FlowKey<L>) -> T {
        let mut min_val = T::MAX;
        for cell in self.cells(key) {
            min_val = min_val.min(pool.query(self.pkt_cnt_idx(cell)));
        }
        min_val
    }

    fn heavy_hitters(&self, pool: &CounterPool<T>, threshold: f64) -> Vec<(FlowKey<L>, T)> {
        let mut flows = self.decode(pool);
        flows.retain(|(_, v)| v.to_f64() >= threshold);
        flows
    }

    fn reset(&mut self) {
        self.filter.fill(false);
        self.flow_xor.fill(FlowKey::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;

    #[test]
    fn decodes_flows_over_an_exact_pool() {
        let mut fr = FlowRadar::<4>::new(512, 3, 64, 3, 11).unwrap();
        let n = <FlowRadar<4> as PoolSketch<4, i64>>::cnt_num(&fr);
        let mut pool: CounterPool<i64> =
            CounterPool::with_config(&PoolConfig::new(n, n, 1).unwrap()).unwrap();
        PoolSketch::<4, i64>::bind(&mut fr, 0);

        let flows: Vec<(FlowKey<4>, i64)> = (1u8..=8)
            .map(|i| (FlowKey::new([i, 0, i, 1]), i as i64 * 3))
            .collect();
        for &(key, total) in &flows {
            for _ in 0..total {
                fr.on_record(&mut pool, &key, 1);
            }
        }
        pool.restore();

        let mut decoded = fr.decode(&pool);
        decoded.sort();
        let mut expected = flows.clone();
        expected.sort();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn filter_suppresses_duplicate_flow_counts() {
        let mut fr = FlowRadar::<4>::new(256, 2, 32, 2, 3).unwrap();
        let n = <FlowRadar<4> as PoolSketch<4, i64>>::cnt_num(&fr);
        let mut pool: CounterPool<i64> =
            CounterPool::with_config(&PoolConfig::new(n, n, 1).unwrap()).unwrap();
        PoolSketch::<4, i64>::bind(&mut fr, 0);

        let key = FlowKey::new([5, 6, 7, 8]);
        for _ in 0..10 {
            fr.on_record(&mut pool, &key, 1);
        }
        pool.restore();
        // the flow count region carries one count per cell of the key,
        // not ten
        let total_flow_cnt: i64 = (0..32).map(|c| pool.query(c)).sum();
        assert_eq!(total_flow_cnt, fr.cells(&key).len() as i64);
    }
}
