//! Per-virtual-counter shadow counters.
//!
//! A shadow counter holds the exact value of a small flow in a few bits.
//! Once an update would push it outside `[0, 2^bits)` it overflows, and
//! overflow is sticky: the counter ignores all later updates and the
//! flow's remaining mass is routed to the shared pool instead. After
//! restoration the pool adds `2^bits` back for every overflowed slot,
//! accounting for the mass the shadow absorbed (including the one update
//! lost to the overflow transition itself).

/// Sentinel for the overflowed state.
const OVERFLOWED: i32 = -1;

/// A saturating fixed-width counter.
///
/// The width is owned by the pool and passed into [`update`]
/// (`ShadowCounter::update`); a counter on its own is just the stored
/// value.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct ShadowCounter {
    val: i32,
}

impl ShadowCounter {
    /// Whether this counter has overflowed.
    #[inline]
    pub fn overflow(&self) -> bool {
        self.val == OVERFLOWED
    }

    /// Applies `delta` under a `bits`-wide range.
    ///
    /// Moves to `val + delta` when the result stays in `[0, 2^bits)`;
    /// otherwise transitions irreversibly to the overflowed state. The
    /// update that triggers the transition is dropped; the `2^bits`
    /// post-restore offset covers it.
    #[inline]
    pub fn update(&mut self, delta: i64, bits: u32) {
        if self.val == OVERFLOWED {
            return;
        }
        let next = self.val as i64 + delta;
        if next < 0 || next >= 1i64 << bits {
            self.val = OVERFLOWED;
        } else {
            self.val = next as i32;
        }
    }

    /// The stored value. Callers must check [`overflow`]
    /// (`ShadowCounter::overflow`) first.
    #[inline]
    pub fn get(&self) -> i32 {
        debug_assert!(self.val != OVERFLOWED, "query of an overflowed shadow counter");
        self.val
    }

    /// Resets to zero.
    #[inline]
    pub fn clear(&mut self) {
        self.val = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_exactly_below_the_width() {
        let mut c = ShadowCounter::default();
        for _ in 0..15 {
            c.update(1, 4);
        }
        assert!(!c.overflow());
        assert_eq!(c.get(), 15);
    }

    #[test]
    fn overflow_is_sticky() {
        let mut c = ShadowCounter::default();
        for _ in 0..16 {
            c.update(1, 4);
        }
        assert!(c.overflow());
        // further updates are ignored, in either direction
        c.update(-100, 4);
        c.update(1, 4);
        assert!(c.overflow());
    }

    #[test]
    fn negative_excursion_overflows() {
        let mut c = ShadowCounter::default();
        c.update(3, 4);
        c.update(-4, 4);
        assert!(c.overflow());
    }

    #[test]
    fn clear_restarts_from_zero() {
        let mut c = ShadowCounter::default();
        c.update(200, 3);
        assert!(c.overflow());
        c.clear();
        assert!(!c.overflow());
        assert_eq!(c.get(), 0);
    }
}
