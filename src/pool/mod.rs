//! The shared counter pool.
//!
//! Sketches nominally own large arrays of *virtual* counters; the pool
//! folds all of them onto one much smaller array of *physical* counters
//! split into `K` groups of pairwise-coprime sizes. Virtual counter `v`
//! maps to one slot per group (`offset[g] + v mod size[g]`), updates are
//! spread round-robin across the groups, and an offline
//! [`restore`](CounterPool::restore) pass reconstructs per-virtual-counter
//! estimates from the aggregate; see the [`restore`] module for the
//! pipeline.
//!
//! Because the group sizes are pairwise coprime, two distinct virtual
//! counters can collide in at most `K − 1` groups, and a virtual index is
//! uniquely determined by its residues once the accumulated modulus
//! exceeds the virtual range. Both facts carry the restoration.
//!
//! # Lifecycle
//!
//! A pool is created uninitialized, parametrized exactly once with
//! [`init`](CounterPool::init), updated any number of times, and restored
//! once per epoch. [`clear`](CounterPool::clear) starts a new epoch over
//! the same layout. Out-of-range indices, double initialization, and
//! queries before restore are contract violations and panic.
//!
//! # Examples
//!
//! ```
//! use countcraft::pool::{CounterPool, PoolConfig};
//!
//! let mut pool: CounterPool<i64> = CounterPool::new();
//! pool.init(&PoolConfig::new(256, 120, 6).unwrap()).unwrap();
//! for _ in 0..60 {
//!     pool.update(7, 1);
//! }
//! pool.restore();
//! assert!(pool.query(7) >= 0);
//! ```

pub mod restore;

use std::io::{self, Write};

use serde::Deserialize;
use tracing::debug;

use crate::core::shadow::ShadowCounter;
use crate::core::value::CounterValue;
use crate::error::{CountCraftError, Result};
use crate::util::is_coprime;

/// Widest shadow counter the i32-backed cells support.
const MAX_SHADOW_BITS: u32 = 30;

/// How a round of large-counter extraction picks its per-group threshold.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
pub enum ThresholdMethod {
    /// Threshold derived from the group's share of total mass
    /// (`tr · V/K` plus the expected per-slot small mass).
    #[default]
    #[serde(rename = "THETA_METHOD")]
    Theta,
    /// Threshold is the counter value at rank `⌊tr · group_size⌋`,
    /// largest first.
    #[serde(rename = "RANK_METHOD")]
    Rank,
}

/// Hyperparameters of the restoration pipeline.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Threshold rule for large-counter rounds.
    pub method: ThresholdMethod,
    /// Number of large-counter rounds.
    pub rounds: u32,
    /// Per-side trim of the per-group estimates (`2·clip < K`).
    pub clip: u32,
    /// Threshold parameter of the first round.
    pub init_val: f64,
    /// Per-round threshold change: divisor under
    /// [`ThresholdMethod::Theta`], increment under
    /// [`ThresholdMethod::Rank`].
    pub step_val: f64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        RestoreConfig {
            method: ThresholdMethod::Theta,
            rounds: 2,
            clip: 0,
            init_val: 0.1,
            step_val: 2.0,
        }
    }
}

/// Parameters of a counter pool.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of virtual counters (`N`).
    pub virtual_counters: usize,
    /// Target physical budget (`m`); the layout lands at `M ≥ m` after
    /// the coprime search.
    pub physical_target: usize,
    /// Number of groups (`K`).
    pub groups: usize,
    /// Shadow counter width in bits; 0 disables the shadow channel.
    pub shadow_bits: u32,
    /// Restoration hyperparameters.
    pub restore: RestoreConfig,
}

impl PoolConfig {
    /// Builds a config with the shadow channel disabled and default
    /// restoration parameters.
    ///
    /// # Errors
    ///
    /// Rejects `n = 0`, `k = 0`, and budgets with `⌊m/k⌋ < 2` (a group of
    /// size 0 or 1 collapses every virtual counter onto one slot).
    pub fn new(virtual_counters: usize, physical_target: usize, groups: usize) -> Result<Self> {
        if virtual_counters == 0 {
            return Err(CountCraftError::invalid_parameters(
                "virtual counter count must be positive",
            ));
        }
        if groups == 0 {
            return Err(CountCraftError::invalid_parameters(
                "group count must be positive",
            ));
        }
        if physical_target / groups < 2 {
            return Err(CountCraftError::invalid_parameters(format!(
                "physical budget too small: floor({physical_target}/{groups}) < 2"
            )));
        }
        Ok(PoolConfig {
            virtual_counters,
            physical_target,
            groups,
            shadow_bits: 0,
            restore: RestoreConfig::default(),
        })
    }

    /// Enables the shadow channel with `bits`-wide counters.
    pub fn with_shadow(mut self, bits: u32) -> Result<Self> {
        if bits > MAX_SHADOW_BITS {
            return Err(CountCraftError::invalid_parameters(format!(
                "shadow width {bits} exceeds {MAX_SHADOW_BITS} bits"
            )));
        }
        self.shadow_bits = bits;
        Ok(self)
    }

    /// Replaces the restoration hyperparameters.
    pub fn with_restore(mut self, restore: RestoreConfig) -> Result<Self> {
        if 2 * restore.clip as usize >= self.groups {
            return Err(CountCraftError::invalid_parameters(format!(
                "clip {} too large for {} groups",
                restore.clip, self.groups
            )));
        }
        self.restore = restore;
        Ok(self)
    }
}

/// Restoration state, allocated by the first [`CounterPool::restore`] of
/// an epoch.
#[derive(Debug)]
pub(crate) struct RestoreState<T> {
    /// Unrestored virtual counters currently mapped to each physical slot.
    pub(crate) shared_cnt: Vec<i32>,
    /// Restored per-virtual-counter values.
    pub(crate) restored: Vec<T>,
    /// Whether each virtual counter has been restored.
    pub(crate) is_restored: Vec<bool>,
    /// Count of virtual counters not yet restored.
    pub(crate) unrestored: usize,
}

/// The shared pool of physical counters.
///
/// Generic over the physical cell type; `i64` cells are the default,
/// `i32` halves the memory when cumulative sums fit.
#[derive(Debug)]
pub struct CounterPool<T: CounterValue = i64> {
    initialized: bool,
    restore_done: bool,
    /// `N`, the number of virtual counters.
    virtual_len: usize,
    /// `M`, the number of physical counters, `Σ group_sizes`.
    physical_len: usize,
    /// `K`, the number of groups.
    groups: usize,
    /// Pairwise-coprime group sizes.
    group_sizes: Vec<i64>,
    /// Prefix sums of `group_sizes`, length `K + 1`, starting at 0.
    group_offsets: Vec<i64>,
    counters: Vec<T>,
    /// One shadow per virtual counter; empty when the channel is off.
    shadow: Vec<ShadowCounter>,
    shadow_bits: u32,
    /// Dispatch tag: group `update_cnt % K` takes the next routed update.
    update_cnt: u64,
    restore_cfg: RestoreConfig,
    pub(crate) restore: Option<RestoreState<T>>,
}

impl<T: CounterValue> Default for CounterPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CounterValue> CounterPool<T> {
    /// Creates an uninitialized pool; call [`init`](Self::init) before use.
    pub fn new() -> Self {
        CounterPool {
            initialized: false,
            restore_done: false,
            virtual_len: 0,
            physical_len: 0,
            groups: 0,
            group_sizes: Vec::new(),
            group_offsets: Vec::new(),
            counters: Vec::new(),
            shadow: Vec::new(),
            shadow_bits: 0,
            update_cnt: 0,
            restore_cfg: RestoreConfig::default(),
            restore: None,
        }
    }

    /// Creates and initializes a pool in one step.
    pub fn with_config(config: &PoolConfig) -> Result<Self> {
        let mut pool = Self::new();
        pool.init(config)?;
        Ok(pool)
    }

    /// Parametrizes the pool: chooses the group layout and allocates the
    /// counter arrays. Must be called exactly once.
    ///
    /// The group sizes are the smallest pairwise-coprime sequence found by
    /// a successor search starting at `⌊m/K⌋`: a candidate joins the
    /// layout once it is coprime to every size already chosen.
    ///
    /// # Panics
    ///
    /// Panics when called on an already-initialized pool.
    pub fn init(&mut self, config: &PoolConfig) -> Result<()> {
        assert!(!self.initialized, "pool initialized twice");
        if 2 * config.restore.clip as usize >= config.groups {
            return Err(CountCraftError::invalid_parameters(format!(
                "clip {} too large for {} groups",
                config.restore.clip, config.groups
            )));
        }
        if config.shadow_bits > MAX_SHADOW_BITS {
            return Err(CountCraftError::invalid_parameters(format!(
                "shadow width {} exceeds {MAX_SHADOW_BITS} bits",
                config.shadow_bits
            )));
        }
        let n = config.virtual_counters;
        let k = config.groups;
        if n == 0 || k == 0 || config.physical_target / k < 2 {
            return Err(CountCraftError::invalid_parameters(
                "pool dimensions must satisfy n > 0, k > 0, floor(m/k) >= 2",
            ));
        }

        let mut sizes: Vec<i64> = Vec::with_capacity(k);
        let mut candidate = (config.physical_target / k) as i64;
        while sizes.len() < k {
            while !sizes.iter().all(|&g| is_coprime(candidate, g)) {
                candidate += 1;
                if candidate > i64::from(u32::MAX) {
                    return Err(CountCraftError::invalid_parameters(
                        "group layout search diverged",
                    ));
                }
            }
            sizes.push(candidate);
        }
        let mut offsets = Vec::with_capacity(k + 1);
        offsets.push(0i64);
        for &g in &sizes {
            offsets.push(offsets.last().unwrap() + g);
        }
        let m = *offsets.last().unwrap() as usize;

        debug!(n, m, k, sizes = ?sizes, "counter pool layout");

        self.virtual_len = n;
        self.physical_len = m;
        self.groups = k;
        self.group_sizes = sizes;
        self.group_offsets = offsets;
        self.counters = vec![T::ZERO; m];
        self.shadow_bits = config.shadow_bits;
        if config.shadow_bits > 0 {
            self.shadow = vec![ShadowCounter::default(); n];
        }
        self.restore_cfg = config.restore;
        self.initialized = true;
        Ok(())
    }

    /// Physical slot of virtual counter `v` in group `g`.
    #[inline]
    pub(crate) fn slot(&self, g: usize, v: usize) -> usize {
        (self.group_offsets[g] + (v as i64) % self.group_sizes[g]) as usize
    }

    /// Routes an update of `delta` to virtual counter `v`.
    ///
    /// A live shadow counter absorbs the delta; otherwise one group is
    /// picked round-robin (`update_cnt % K`, before the increment) and
    /// the delta lands on `v`'s slot there. One dispatch-tag increment
    /// per call, shadow or not.
    #[inline]
    pub fn update(&mut self, v: usize, delta: T) {
        assert!(self.initialized, "update before init");
        assert!(v < self.virtual_len, "virtual index {v} out of range");
        if !self.shadow.is_empty() && !self.shadow[v].overflow() {
            self.shadow[v].update(delta.to_i64(), self.shadow_bits);
        } else {
            let g = (self.update_cnt % self.groups as u64) as usize;
            let p = self.slot(g, v);
            self.counters[p] = self.counters[p].add(delta);
        }
        self.update_cnt += 1;
    }

    /// Applies `delta` directly to physical slot `p`, bypassing both the
    /// shadow channel and the round-robin dispatch.
    ///
    /// This is the eviction hook HashPipe uses to correct a specific slot
    /// in place; the caller is responsible for `p` being a slot it owns.
    #[inline]
    pub fn uniform_update(&mut self, p: usize, delta: T) {
        assert!(self.initialized, "uniform_update before init");
        assert!(p < self.physical_len, "physical index {p} out of range");
        self.counters[p] = self.counters[p].add(delta);
    }

    /// Pre-restore point estimate of virtual counter `v`: the shadow
    /// value while the shadow is live, otherwise the minimum over `v`'s
    /// `K` physical slots (a Count-Min-style upper bound on `v`'s own
    /// mass divided across groups).
    pub fn est(&self, v: usize) -> T {
        self.est_slot(v).0
    }

    /// [`est`](Self::est) plus the physical slot the minimum came from.
    ///
    /// The slot is always a physical one, even while the shadow is live,
    /// so eviction corrections have a target; see `sketch::hash_pipe`.
    pub fn est_slot(&self, v: usize) -> (T, usize) {
        assert!(self.initialized, "est before init");
        assert!(v < self.virtual_len, "virtual index {v} out of range");
        let mut min_val = T::MAX;
        let mut min_slot = self.slot(0, v);
        for g in 0..self.groups {
            let p = self.slot(g, v);
            if self.counters[p] < min_val {
                min_val = self.counters[p];
                min_slot = p;
            }
        }
        if !self.shadow.is_empty() && !self.shadow[v].overflow() {
            return (T::from_i64(self.shadow[v].get() as i64), min_slot);
        }
        (min_val, min_slot)
    }

    /// Restored value of virtual counter `v`.
    ///
    /// # Panics
    ///
    /// Panics before [`restore`](Self::restore) has completed.
    #[inline]
    pub fn query(&self, v: usize) -> T {
        assert!(self.initialized, "query before init");
        assert!(self.restore_done, "query before restore");
        assert!(v < self.virtual_len, "virtual index {v} out of range");
        self.restore.as_ref().expect("restore state").restored[v]
    }

    /// The `K` physical counter values `v` currently maps to, group by
    /// group. Diagnostic; used by tests and tracing.
    pub fn slot_values(&self, v: usize) -> Vec<T> {
        assert!(self.initialized);
        (0..self.groups).map(|g| self.counters[self.slot(g, v)]).collect()
    }

    /// Starts a new epoch over the same layout: zeroes counters and
    /// shadows, drops restoration state, resets the dispatch tag.
    pub fn clear(&mut self) {
        if !self.initialized {
            return;
        }
        self.counters.fill(T::ZERO);
        for s in &mut self.shadow {
            s.clear();
        }
        self.restore = None;
        self.restore_done = false;
        self.update_cnt = 0;
    }

    /// Writes restored values, whitespace-separated with a newline every
    /// 100 values.
    pub fn dump_results(&self, out: &mut impl Write) -> io::Result<()> {
        assert!(self.restore_done, "dump before restore");
        let restored = &self.restore.as_ref().expect("restore state").restored;
        for (i, v) in restored.iter().enumerate() {
            write!(out, "{} ", v)?;
            if i % 100 == 99 {
                writeln!(out)?;
            }
        }
        Ok(())
    }

    /// Number of virtual counters (`N`).
    pub fn virtual_len(&self) -> usize {
        self.virtual_len
    }

    /// Number of physical counters (`M`).
    pub fn physical_len(&self) -> usize {
        self.physical_len
    }

    /// Number of groups (`K`).
    pub fn group_count(&self) -> usize {
        self.groups
    }

    /// The pairwise-coprime group sizes.
    pub fn group_sizes(&self) -> &[i64] {
        &self.group_sizes
    }

    /// Prefix sums of the group sizes (length `K + 1`).
    pub fn group_offsets(&self) -> &[i64] {
        &self.group_offsets
    }

    /// Whether [`init`](Self::init) has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the shadow channel is enabled.
    pub fn shadow_enabled(&self) -> bool {
        !self.shadow.is_empty()
    }

    /// Whether [`restore`](Self::restore) has completed this epoch.
    pub fn is_restored(&self) -> bool {
        self.restore_done
    }

    /// Total mass currently in the physical array. With the shadow
    /// channel disabled this equals the total routed update mass;
    /// shadows absorb small flows before they reach the array.
    pub fn physical_total(&self) -> i64 {
        self.counters.iter().map(|c| c.to_i64()).sum()
    }

    #[cfg(test)]
    pub(crate) fn set_counter(&mut self, p: usize, val: T) {
        assert!(p < self.physical_len);
        self.counters[p] = val;
    }
}
