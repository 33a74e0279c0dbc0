//! Core data types shared across the pool and the sketches.
//!
//! - [`value`]: the sealed [`CounterValue`] trait the physical counter
//!   cells are generic over
//! - [`flow`]: fixed-width flow keys and stream records
//! - [`shadow`]: the per-virtual-counter saturating shadow counter

pub mod flow;
pub mod shadow;
pub mod value;

pub use flow::{CntMethod, FlowKey, StreamRecord};
pub use shadow::ShadowCounter;
pub use value::CounterValue;
