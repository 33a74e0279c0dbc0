//! Sketch adapters over the shared counter pool.
//!
//! Every sketch owns a contiguous range of virtual counters inside one
//! [`CounterPool`] and goes through the same three-phase protocol: it is
//! *bound* to its offset, it *updates* the pool while the stream flows,
//! and after restoration it answers *queries* from restored values.
//!
//! | Sketch | Virtual range | Answers |
//! |--------|---------------|---------|
//! | [`CountMin`] | `depth × width` | per-flow frequency (min over rows) |
//! | [`FlowRadar`] | `2 × count_table_num` | full flow/value decode |
//! | [`HashPipe`] | `depth × width` | per-flow frequency, heavy hitters |
//! | [`Deltoid`] | `rows × groups × key_bits` | per-flow frequency, heavy hitters |
//!
//! [`CounterPool`]: crate::pool::CounterPool

pub mod count_min;
pub mod deltoid;
pub mod flow_radar;
pub mod hash_pipe;

pub use count_min::CountMin;
pub use deltoid::Deltoid;
pub use flow_radar::FlowRadar;
pub use hash_pipe::HashPipe;

use crate::core::flow::{CntMethod, FlowKey, StreamRecord};
use crate::core::value::CounterValue;
use crate::pool::CounterPool;

/// Contract a sketch honors to plug into the shared pool.
///
/// The pool is owned by the driver and only borrowed here: mutably while
/// updating, immutably while querying. An adapter must never hold on to
/// it.
pub trait PoolSketch<const L: usize, T: CounterValue> {
    /// Short tag for reports and logs.
    fn name(&self) -> &'static str;

    /// Number of virtual counters this sketch requires.
    fn cnt_num(&self) -> usize;

    /// Assigns the sketch's offset into the pool's virtual index space.
    /// Called once, before any update.
    fn bind(&mut self, offset: usize);

    /// Feeds one record into the sketch.
    fn on_record(&mut self, pool: &mut CounterPool<T>, key: &FlowKey<L>, weight: T);

    /// Feeds a whole stream slice, weighting records per `method`.
    fn do_update(
        &mut self,
        pool: &mut CounterPool<T>,
        records: &[StreamRecord<L>],
        method: CntMethod,
    ) {
        for record in records {
            self.on_record(pool, &record.key, T::from_i64(i64::from(record.weight(method))));
        }
    }

    /// Estimated value of `key`, from restored counters. Only valid after
    /// the pool has been restored.
    fn query(&self, pool: &CounterPool<T>, key: &FlowKey<L>) -> T;

    /// Flows whose estimate reaches `threshold`, from restored counters.
    ///
    /// Sketches without a recovery structure return nothing.
    fn heavy_hitters(&self, pool: &CounterPool<T>, threshold: f64) -> Vec<(FlowKey<L>, T)> {
        let _ = (pool, threshold);
        Vec::new()
    }

    /// Drops sketch-local state (resident keys, filters, sums) for a new
    /// epoch. The pool is cleared separately by its owner.
    fn reset(&mut self) {}
}
