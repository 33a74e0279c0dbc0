//! The restoration pipeline.
//!
//! Restoration turns the aggregated physical array back into
//! per-virtual-counter estimates, in five steps:
//!
//! 1. seed the shared-count bookkeeping,
//! 2. peel off small flows held exactly by live shadow counters,
//! 3. iteratively extract *large* counters: candidate virtual indices
//!    are recovered by lifting per-group heavy residues with the Chinese
//!    Remainder Theorem, their values estimated by a trimmed mean over
//!    the `K` residue views, and their mass subtracted from the array,
//! 4. estimate every remaining counter from the residual mass,
//! 5. add the `2^bits` offset back for overflowed shadow counters.
//!
//! Extracting the heavy tail first matters: each large counter removed
//! from the array lowers the noise floor every remaining counter is
//! estimated against.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::{CounterPool, RestoreState, ThresholdMethod};
use crate::core::value::CounterValue;
use crate::util::{increment, mul_inverse, nth_largest};

impl<T: CounterValue> CounterPool<T> {
    /// Runs the restoration pipeline. One-shot per epoch; afterwards
    /// [`query`](Self::query) serves restored values.
    pub fn restore(&mut self) {
        assert!(self.initialized, "restore before init");
        assert!(!self.restore_done, "restore run twice in one epoch");
        self.init_restore();
        if !self.shadow.is_empty() {
            self.pre_shadow();
        }
        let cfg = self.restore_cfg;
        let mut tr = cfg.init_val;
        for round in 0..cfg.rounds {
            let ids = self.get_large_ids(tr, cfg.method);
            trace!(round, tr, candidates = ids.len(), "large-counter round");
            if ids.is_empty() {
                continue;
            }
            self.restore_large(&ids, cfg.clip);
            match cfg.method {
                ThresholdMethod::Theta => tr /= cfg.step_val,
                ThresholdMethod::Rank => tr += cfg.step_val,
            }
        }
        self.restore_small();
        if !self.shadow.is_empty() {
            self.post_shadow();
        }
        self.restore_done = true;
        debug!(n = self.virtual_len, "restore complete");
    }

    /// Allocates restoration state and seeds the shared counts: in group
    /// `g` of size `s`, the first `N mod s` slots carry `⌈N/s⌉` virtual
    /// counters and the rest carry `⌊N/s⌋`.
    pub(crate) fn init_restore(&mut self) {
        let n = self.virtual_len;
        let mut shared_cnt = vec![0i32; self.physical_len];
        for g in 0..self.groups {
            let size = self.group_sizes[g] as usize;
            let offset = self.group_offsets[g] as usize;
            let base = (n / size) as i32;
            let rem = n % size;
            for s in 0..size {
                shared_cnt[offset + s] = base + i32::from(s < rem);
            }
        }
        self.restore = Some(RestoreState {
            shared_cnt,
            restored: vec![T::ZERO; n],
            is_restored: vec![false; n],
            unrestored: n,
        });
    }

    /// Commits every non-overflowed shadow counter as an exact restored
    /// value, removing those flows from the residual problem before the
    /// CRT machinery runs.
    fn pre_shadow(&mut self) {
        let mut state = self.restore.take().expect("restore state");
        for v in 0..self.virtual_len {
            if self.shadow[v].overflow() {
                continue;
            }
            state.restored[v] = T::from_i64(self.shadow[v].get() as i64);
            state.is_restored[v] = true;
            state.unrestored -= 1;
            for g in 0..self.groups {
                state.shared_cnt[self.slot(g, v)] -= 1;
            }
        }
        trace!(unrestored = state.unrestored, "shadow pre-pass");
        self.restore = Some(state);
    }

    /// Adds `2^bits` to every overflowed shadow counter's restored value:
    /// that is the mass the shadow channel absorbed before overflow
    /// redirected the flow to the shared array.
    fn post_shadow(&mut self) {
        let offset = 1i64 << self.shadow_bits;
        let state = self.restore.as_mut().expect("restore state");
        for v in 0..self.virtual_len {
            if self.shadow[v].overflow() {
                debug_assert!(state.is_restored[v]);
                state.restored[v] = T::from_i64(state.restored[v].to_i64() + offset);
            }
        }
    }

    /// Per-group extraction threshold for the current round.
    fn group_threshold(&self, g: usize, tr: f64, method: ThresholdMethod, total: i64, mu: f64, unrestored: usize) -> i64 {
        let k = self.groups as f64;
        let size = self.group_sizes[g];
        match method {
            ThresholdMethod::Theta => {
                // expected per-slot share of residual small mass, using
                // the integral count of virtual counters per slot
                let per_slot = (unrestored as i64) / size;
                (tr * total as f64 / k + (mu / k) * per_slot as f64) as i64
            }
            ThresholdMethod::Rank => {
                let offset = self.group_offsets[g] as usize;
                let slice: Vec<i64> = self.counters[offset..offset + size as usize]
                    .iter()
                    .map(|c| c.to_i64())
                    .collect();
                nth_largest(&slice, (tr * size as f64) as usize)
            }
        }
    }

    /// Enumerates candidate large virtual counters above the round's
    /// threshold.
    ///
    /// Heavy residues of the leading groups are combined with the CRT
    /// until the accumulated modulus pins candidates down within `[0, N)`;
    /// the remaining groups then only *verify* that each candidate's slot
    /// is heavy too. Already-restored counters are dropped at the end.
    pub(crate) fn get_large_ids(&self, tr: f64, method: ThresholdMethod) -> Vec<usize> {
        let unrestored = self.restore.as_ref().map_or(self.virtual_len, |s| s.unrestored);
        if unrestored == 0 {
            return Vec::new();
        }
        let n = self.virtual_len as i64;
        let total = self.physical_total();
        let mu = total as f64 / unrestored as f64;

        let thre = self.group_threshold(0, tr, method, total, mu, unrestored);
        let offset0 = self.group_offsets[0] as usize;
        let mut candidates: Vec<i64> = (0..self.group_sizes[0])
            .filter(|&r| self.counters[offset0 + r as usize].to_i64() >= thre)
            .collect();

        // CRT phase: lift residues group by group while the accumulated
        // modulus still leaves candidates ambiguous within [0, N).
        let mut g_idx = 1;
        let mut modulus = self.group_sizes[0];
        while g_idx < self.groups {
            let g = self.group_sizes[g_idx];
            let g_inv = mul_inverse(g, modulus);
            let m_inv = mul_inverse(modulus, g);
            let lift_mod = modulus * g;
            let thre = self.group_threshold(g_idx, tr, method, total, mu, unrestored);
            let offset = self.group_offsets[g_idx] as usize;
            let mut next = Vec::new();
            for s in 0..g {
                if self.counters[offset + s as usize].to_i64() < thre {
                    continue;
                }
                // x ≡ r (mod modulus) and x ≡ s (mod g) has the unique
                // solution x = g·g_inv·r + modulus·m_inv·s (mod modulus·g);
                // widen to i128: the products overrun i64 for large pools
                for &r in &candidates {
                    let x = ((g as i128 * g_inv as i128 % lift_mod as i128) * r as i128
                        + (modulus as i128 * m_inv as i128 % lift_mod as i128) * s as i128)
                        .rem_euclid(lift_mod as i128) as i64;
                    if x < n {
                        next.push(x);
                    }
                }
            }
            candidates = next;
            g_idx += 1;
            if modulus > n / g {
                break;
            }
            modulus *= g;
        }

        // verification phase: candidates are unique ids now, remaining
        // groups only filter
        while g_idx < self.groups {
            let thre = self.group_threshold(g_idx, tr, method, total, mu, unrestored);
            let g = self.group_sizes[g_idx];
            let offset = self.group_offsets[g_idx];
            candidates.retain(|&x| self.counters[(offset + x % g) as usize].to_i64() >= thre);
            g_idx += 1;
        }

        if let Some(state) = &self.restore {
            candidates.retain(|&x| !state.is_restored[x as usize]);
        }
        candidates.into_iter().map(|x| x as usize).collect()
    }

    /// Estimates and commits a batch of large counters.
    ///
    /// The aggregate large mass `S` is solved from the mass observed in
    /// candidate slots minus the expected small-flow contribution; each
    /// candidate is then estimated by a `clip`-trimmed mean over its `K`
    /// residue views and its per-group share subtracted from the array.
    pub(crate) fn restore_large(&mut self, ids: &[usize], clip: u32) {
        let mut state = self.restore.take().expect("restore state");
        let k = self.groups;

        // multiplicity of candidate mappings per physical slot; slots no
        // candidate touches are never read
        let mut slots: HashMap<usize, u32> = HashMap::new();
        for g in 0..k {
            for &id in ids {
                increment(&mut slots, self.slot(g, id));
            }
        }
        let total = self.physical_total();
        let mut sum_large = 0i64;
        let mut num_small = 0i64;
        for (&p, &times) in &slots {
            sum_large += self.counters[p].to_i64();
            num_small += i64::from(state.shared_cnt[p] - times as i32);
        }
        if sum_large <= 0 {
            self.restore = Some(state);
            return;
        }

        let unrestored = state.unrestored as f64;
        let kf = k as f64;
        let s_large = ((sum_large as f64
            - (num_small as f64 / kf) * total as f64 / unrestored)
            / (1.0 - num_small as f64 / (unrestored * kf)))
            .trunc();
        let mu_small = if state.unrestored == ids.len() {
            0.0
        } else {
            (total as f64 - s_large) / ((state.unrestored - ids.len()) as f64 * kf)
        };
        trace!(ids = ids.len(), sum_large, s_large, mu_small, "restoring large counters");

        let mut views: Vec<f64> = Vec::with_capacity(k);
        for &id in ids {
            views.clear();
            for g in 0..k {
                let p = self.slot(g, id);
                let times = slots[&p];
                let pure = self.counters[p].to_f64()
                    - mu_small * f64::from(state.shared_cnt[p] - times as i32);
                views.push(pure / f64::from(times));
            }
            views.sort_by(f64::total_cmp);
            let kept = &views[clip as usize..views.len() - clip as usize];
            let est = kept.iter().sum::<f64>() * kf / (kf - 2.0 * f64::from(clip));
            state.restored[id] = T::from_f64(est.max(0.0));
        }

        for &id in ids {
            state.unrestored -= 1;
            state.is_restored[id] = true;
            // integer division: the residue stays in the array for the
            // small-flow estimate
            let share = state.restored[id].to_i64() / k as i64;
            for g in 0..k {
                let p = self.slot(g, id);
                let left = (self.counters[p].to_i64() - share).max(0);
                self.counters[p] = T::from_i64(left);
                state.shared_cnt[p] -= 1;
            }
        }
        self.restore = Some(state);
    }

    /// Estimates every still-unrestored counter from the residual array.
    ///
    /// Each counter's `K` views are summed after subtracting the expected
    /// contribution of the other flows sharing each slot; the result is
    /// clamped to `[0, K · min_view]`. The min-based cap guards against
    /// asymmetric residual noise and the floor enforces non-negativity.
    pub(crate) fn restore_small(&mut self) {
        let mut state = self.restore.take().expect("restore state");
        if state.unrestored == 0 {
            self.restore = Some(state);
            return;
        }
        let k = self.groups;
        let total = self.physical_total();
        let mu = total as f64 / (state.unrestored * k) as f64;
        for id in 0..self.virtual_len {
            if state.is_restored[id] {
                continue;
            }
            let mut estimate = 0.0f64;
            let mut min_view = i64::MAX;
            for g in 0..k {
                let p = self.slot(g, id);
                debug_assert!(state.shared_cnt[p] >= 1);
                estimate +=
                    self.counters[p].to_f64() - f64::from(state.shared_cnt[p] - 1) * mu;
                min_view = min_view.min(self.counters[p].to_i64());
            }
            // eviction corrections can leave individual slots negative;
            // the floor still wins over the min-based cap
            let value = (k as i64 * min_view).min((estimate.trunc() as i64).max(0)).max(0);
            state.restored[id] = T::from_i64(value);
            state.unrestored -= 1;
            state.is_restored[id] = true;
        }
        debug_assert_eq!(state.unrestored, 0);
        self.restore = Some(state);
    }
}

#[cfg(test)]
mod tests {
    use crate::pool::{CounterPool, PoolConfig, ThresholdMethod};

    fn pool_256() -> CounterPool<i32> {
        CounterPool::with_config(&PoolConfig::new(256, 120, 6).unwrap()).unwrap()
    }

    /// Plants mass for virtual counters {0, 101, 202}: value `val` in
    /// each of their six slots.
    fn plant_heavy(pool: &mut CounterPool<i32>, val: i32) {
        for &v in &[0usize, 101, 202] {
            for g in 0..6 {
                pool.set_counter(pool.slot(g, v), val);
            }
        }
    }

    #[test]
    fn shared_count_seeding() {
        let mut pool = pool_256();
        pool.init_restore();
        let state = pool.restore.as_ref().unwrap();
        let off = pool.group_offsets();
        // ceil(256/size) for the first 256 mod size slots, floor after
        for (g, &(hi_slot, hi, lo)) in [
            (15usize, 13, 12),
            (3, 13, 12),
            (2, 12, 11),
            (23, 9, 8),
            (7, 9, 8),
            (33, 7, 6),
        ]
        .iter()
        .enumerate()
        {
            assert_eq!(state.shared_cnt[off[g] as usize + hi_slot], hi);
            assert_eq!(state.shared_cnt[off[g] as usize + hi_slot + 1], lo);
        }
        // every group accounts for all N virtual counters
        for g in 0..6 {
            let sum: i32 = state.shared_cnt[off[g] as usize..off[g + 1] as usize]
                .iter()
                .sum();
            assert_eq!(sum, 256);
        }
    }

    #[test]
    fn large_id_recovery_theta() {
        let mut pool = pool_256();
        plant_heavy(&mut pool, 10);
        let mut ids = pool.get_large_ids(0.1, ThresholdMethod::Theta);
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 101, 202]);
    }

    #[test]
    fn large_id_recovery_rank_tolerates_damage() {
        let mut pool = pool_256();
        plant_heavy(&mut pool, 10);
        // dent three of the eighteen slots; rank thresholds still find
        // the planted ids and nothing else
        let off = pool.group_offsets().to_vec();
        pool.set_counter(off[0] as usize, 1);
        pool.set_counter(off[4] as usize + 8, 1);
        pool.set_counter(off[5] as usize + 17, 0);
        let mut ids = pool.get_large_ids(0.1, ThresholdMethod::Rank);
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 101, 202]);
        // theta, on the damaged array, rejects them all
        let ids = pool.get_large_ids(0.1, ThresholdMethod::Theta);
        assert!(ids.is_empty());
    }

    #[test]
    fn full_restore_of_planted_heavies() {
        let mut pool = pool_256();
        plant_heavy(&mut pool, 10);
        pool.restore();
        for &v in &[0usize, 101, 202] {
            assert_eq!(pool.query(v), 60);
        }
        for &v in &[1usize, 100, 200, 255, 121, 88] {
            assert_eq!(pool.query(v), 0);
        }
    }

    #[test]
    fn restore_is_idempotent_on_empty_rounds() {
        // nothing planted: every round comes back empty, small pass
        // restores all-zero values
        let mut pool = pool_256();
        pool.restore();
        for v in 0..256 {
            assert_eq!(pool.query(v), 0);
        }
    }
}
