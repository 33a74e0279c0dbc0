//! Internal utility functions and helpers.
//!
//! This module provides the number-theoretic primitives the counter pool
//! is built on. These are deliberately small, total functions; contract
//! violations (a modular inverse of non-coprime inputs, a rank past the
//! end of a sequence) are programming errors and are debug-asserted.

pub mod arith;

// Re-export commonly used items
pub use arith::{extended_gcd, increment, is_coprime, mul_inverse, next_prime, nth_largest};
