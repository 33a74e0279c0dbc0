//! The epoch driver: wires configured sketches into one shared pool and
//! runs the update → restore → query protocol.
//!
//! Per epoch:
//!
//! 1. build every configured sketch and assign it a contiguous range of
//!    the virtual index space,
//! 2. size the pool at `total_virtual / ratio` physical counters and
//!    initialize it,
//! 3. feed the stream through every sketch,
//! 4. restore,
//! 5. serve queries and heavy-hitter reports from restored values.
//!
//! The driver owns the pool; sketches borrow it mutably during the
//! update phase and immutably afterwards.

use std::io::{self, Write};

use tracing::{debug, info};

use crate::config::{AcsConfig, SketchTag};
use crate::core::flow::{CntMethod, FlowKey, StreamRecord};
use crate::core::value::CounterValue;
use crate::error::{CountCraftError, Result};
use crate::pool::{CounterPool, PoolConfig, RestoreConfig};
use crate::sketch::{CountMin, Deltoid, FlowRadar, HashPipe, PoolSketch};

/// Per-sketch epoch report.
#[derive(Debug)]
pub struct SketchReport<const L: usize, T> {
    /// The sketch's tag.
    pub name: &'static str,
    /// Flows whose estimate reached the sketch's configured threshold.
    pub heavy_hitters: Vec<(FlowKey<L>, T)>,
}

/// Drives one pool and its bound sketches through an epoch.
pub struct Driver<const L: usize, T: CounterValue = i64> {
    pool: CounterPool<T>,
    sketches: Vec<Box<dyn PoolSketch<L, T>>>,
    thresholds: Vec<f64>,
    cnt_method: CntMethod,
}

impl<const L: usize, T: CounterValue> Driver<L, T> {
    /// Builds sketches and pool from a validated configuration.
    ///
    /// Any configuration error aborts the build; nothing is updated or
    /// restored on the error path.
    pub fn from_config(cfg: &AcsConfig) -> Result<Self> {
        cfg.validate()?;
        let settings = &cfg.config;

        let mut sketches: Vec<Box<dyn PoolSketch<L, T>>> = Vec::new();
        let mut thresholds = Vec::new();
        for (i, tag) in settings.sketch.iter().enumerate() {
            // one seed lane per sketch, all derived from the base seed
            let seed = settings
                .seed
                .wrapping_add((i as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            match tag.parse::<SketchTag>()? {
                SketchTag::CountMin => {
                    let p = cfg.cm.as_ref().expect("validated").para;
                    sketches.push(Box::new(CountMin::<L>::new(p.depth, p.width, seed)?));
                    thresholds.push(f64::INFINITY);
                }
                SketchTag::FlowRadar => {
                    let p = cfg.flowradar.as_ref().expect("validated").para;
                    sketches.push(Box::new(FlowRadar::<L>::new(
                        p.flow_filter_bit,
                        p.flow_filter_hash,
                        p.count_table_num,
                        p.count_table_hash,
                        seed,
                    )?));
                    thresholds.push(p.heavy_thre);
                }
                SketchTag::HashPipe => {
                    let p = cfg.hashpipe.as_ref().expect("validated").para;
                    sketches.push(Box::new(HashPipe::<L>::new(p.depth, p.width, seed)?));
                    thresholds.push(p.heavy_thre);
                }
                SketchTag::Deltoid => {
                    let p = cfg.deltoid.as_ref().expect("validated").para;
                    sketches.push(Box::new(Deltoid::<L, T>::new(p.num_hash, p.num_group, seed)?));
                    thresholds.push(p.heavy_thre);
                }
            }
        }

        let mut offset = 0usize;
        for sketch in &mut sketches {
            sketch.bind(offset);
            offset += sketch.cnt_num();
            debug!(name = sketch.name(), end = offset, "bound sketch");
        }
        let total = offset;
        if total == 0 {
            return Err(CountCraftError::invalid_parameters(
                "configured sketches request no counters",
            ));
        }

        let pool_cfg = PoolConfig::new(total, total / settings.ratio, settings.k)?
            .with_shadow(settings.shadow_bits)?
            .with_restore(RestoreConfig {
                method: settings.get_method,
                rounds: settings.iternum,
                clip: settings.clip,
                init_val: settings.init_val,
                step_val: settings.step_val,
            })?;
        let pool = CounterPool::with_config(&pool_cfg)?;
        info!(
            virtual_counters = total,
            physical_counters = pool.physical_len(),
            groups = settings.k,
            sketches = sketches.len(),
            "driver ready"
        );

        Ok(Driver {
            pool,
            sketches,
            thresholds,
            cnt_method: settings.cnt_method,
        })
    }

    /// Feeds a stream slice through every sketch.
    pub fn do_updates(&mut self, records: &[StreamRecord<L>]) {
        for sketch in &mut self.sketches {
            sketch.do_update(&mut self.pool, records, self.cnt_method);
        }
        debug!(records = records.len(), "update phase done");
    }

    /// Restores the pool; queries are valid afterwards.
    pub fn restore(&mut self) {
        self.pool.restore();
    }

    /// Runs a whole epoch over `records`.
    pub fn run_epoch(&mut self, records: &[StreamRecord<L>]) {
        self.do_updates(records);
        self.restore();
    }

    /// Estimate of `key` by sketch `idx` (binding order).
    pub fn query(&self, idx: usize, key: &FlowKey<L>) -> T {
        self.sketches[idx].query(&self.pool, key)
    }

    /// Heavy-hitter report of sketch `idx` at its configured threshold.
    pub fn heavy_hitters(&self, idx: usize) -> Vec<(FlowKey<L>, T)> {
        self.sketches[idx].heavy_hitters(&self.pool, self.thresholds[idx])
    }

    /// Reports from every sketch with a finite threshold.
    pub fn reports(&self) -> Vec<SketchReport<L, T>> {
        self.sketches
            .iter()
            .zip(&self.thresholds)
            .filter(|(_, &t)| t.is_finite())
            .map(|(sketch, &t)| SketchReport {
                name: sketch.name(),
                heavy_hitters: sketch.heavy_hitters(&self.pool, t),
            })
            .collect()
    }

    /// Sketch tags in binding order.
    pub fn sketch_names(&self) -> Vec<&'static str> {
        self.sketches.iter().map(|s| s.name()).collect()
    }

    /// The shared pool.
    pub fn pool(&self) -> &CounterPool<T> {
        &self.pool
    }

    /// Writes the restored virtual counter array.
    pub fn dump_results(&self, out: &mut impl Write) -> io::Result<()> {
        self.pool.dump_results(out)
    }

    /// Starts a new epoch: clears the pool over its existing layout and
    /// drops every sketch's local state.
    pub fn clear(&mut self) {
        self.pool.clear();
        for sketch in &mut self.sketches {
            sketch.reset();
        }
    }
}
