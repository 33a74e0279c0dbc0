//! CountCraft: counter-sharing sketch engine for packet and flow streams.
//!
//! CountCraft runs several streaming sketches (Count-Min, Flow Radar,
//! HashPipe, Deltoid) over **one shared pool** of physical counters.
//! Each sketch believes it owns a large array of virtual counters; the
//! pool folds all of them onto a much smaller physical array organized
//! into pairwise-coprime groups, and reconstructs per-virtual-counter
//! estimates offline with a CRT-based restoration pass. Memory shrinks
//! by the configured ratio; exactness is traded for bounded estimation
//! error.
//!
//! # How Sharing Works
//!
//! With `K` groups of pairwise-coprime sizes, virtual counter `v` maps
//! to one slot per group (`v mod size[g]`), and updates are spread
//! round-robin so each group sees ~`1/K` of every counter's mass. On
//! restoration, heavy counters are found by lifting heavy per-group
//! residues with the Chinese Remainder Theorem, estimated by a trimmed
//! mean over their `K` views, and peeled off; the light remainder is
//! estimated against the residual mean. An optional shadow channel
//! keeps small flows exact in a few bits per virtual counter and spills
//! only overflowing flows into the shared array.
//!
//! # Quick Start
//!
//! ```
//! use countcraft::pool::{CounterPool, PoolConfig};
//!
//! // 256 virtual counters folded onto ~120 physical ones, 6 groups
//! let mut pool: CounterPool<i64> =
//!     CounterPool::with_config(&PoolConfig::new(256, 120, 6).unwrap()).unwrap();
//!
//! for packet in 0..600u64 {
//!     pool.update((packet % 7) as usize, 1);
//! }
//! pool.restore();
//! assert!(pool.query(3) >= 0);
//! ```
//!
//! Driving configured sketches over one pool:
//!
//! ```
//! use countcraft::config::ConfigFile;
//! use countcraft::driver::Driver;
//! use countcraft::{FlowKey, StreamRecord};
//!
//! let cfg = ConfigFile::from_toml_str(r#"
//!     [acs.config]
//!     k = 4
//!     ratio = 2
//!     iternum = 2
//!     clip = 0
//!     init_val = 0.1
//!     step_val = 2.0
//!     cnt_method = "InPacket"
//!     get_method = "THETA_METHOD"
//!     sketch = ["CM"]
//!
//!     [acs.cm.para]
//!     depth = 3
//!     width = 128
//! "#).unwrap();
//!
//! let mut driver: Driver<13, i64> = Driver::from_config(&cfg.acs).unwrap();
//! let records: Vec<StreamRecord<13>> = (0u8..100)
//!     .map(|i| StreamRecord::new(FlowKey::new([i % 10; 13]), 64))
//!     .collect();
//! driver.run_epoch(&records);
//! let hot = FlowKey::new([3; 13]);
//! assert!(driver.query(0, &hot) >= 0);
//! ```
//!
//! # Choosing a Sketch
//!
//! | Sketch | Answers | Extra state outside the pool |
//! |--------|---------|------------------------------|
//! | [`sketch::CountMin`] | per-flow frequency | none |
//! | [`sketch::FlowRadar`] | full flow/value decode | flow filter, key XORs |
//! | [`sketch::HashPipe`] | heavy hitters with keys | resident keys |
//! | [`sketch::Deltoid`] | heavy hitters with keys | per-bucket sums |
//!
//! # Scope
//!
//! The engine is single-threaded and memory-resident: no persistence, no
//! recovery, no concurrent writers, no network I/O. Feed it decoded
//! records; it hands back restored estimates.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_range_loop)]

/// Configuration tree consumed by the driver
pub mod config;

/// Core data types: counter values, flow keys, shadow counters
pub mod core;

/// Epoch driver wiring sketches into one pool
pub mod driver;

/// Error types and result aliases
pub mod error;

/// Seeded hash families for sketch rows
pub mod hash;

/// The shared counter pool and its restoration pipeline
pub mod pool;

/// Sketch adapters over the shared pool
pub mod sketch;

/// Number-theoretic utilities
pub mod util;

// Re-export commonly used types at crate root
pub use crate::core::flow::{CntMethod, FlowKey, StreamRecord};
pub use crate::core::shadow::ShadowCounter;
pub use crate::core::value::CounterValue;
pub use error::{CountCraftError, Result};
pub use pool::{CounterPool, PoolConfig, RestoreConfig, ThresholdMethod};
pub use sketch::PoolSketch;

/// Prelude module for convenient imports.
///
/// # Examples
///
/// ```
/// use countcraft::prelude::*;
///
/// let cfg = PoolConfig::new(64, 32, 2).unwrap();
/// let mut pool: CounterPool<i64> = CounterPool::with_config(&cfg).unwrap();
/// pool.update(7, 3);
/// pool.restore();
/// assert!(pool.query(7) >= 0);
/// ```
pub mod prelude {
    pub use crate::config::{AcsConfig, ConfigFile};
    pub use crate::core::flow::{CntMethod, FlowKey, StreamRecord};
    pub use crate::core::value::CounterValue;
    pub use crate::driver::Driver;
    pub use crate::error::{CountCraftError, Result};
    pub use crate::pool::{CounterPool, PoolConfig, RestoreConfig, ThresholdMethod};
    pub use crate::sketch::{CountMin, Deltoid, FlowRadar, HashPipe, PoolSketch};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_covers_the_public_surface() {
        let cfg = PoolConfig::new(128, 64, 4).unwrap();
        let mut pool: CounterPool<i64> = CounterPool::with_config(&cfg).unwrap();
        for v in 0..128 {
            pool.update(v, 1);
        }
        pool.restore();
        let total: i64 = (0..128).map(|v| pool.query(v)).sum();
        assert!(total >= 0);
    }
}
