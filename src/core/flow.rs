//! Flow keys and stream records.
//!
//! A flow key is a fixed-width byte string (13 bytes for the classic
//! 5-tuple: two IPv4 addresses, two ports, one protocol byte). Sketches
//! hash the whole key; Deltoid additionally inspects it bit by bit.

use serde::Deserialize;

/// Fixed-width flow identifier.
///
/// `L` is the key length in bytes. Keys are plain values: `Copy`,
/// ordered, hashable, and all-zeroes by default (the empty-slot sentinel
/// HashPipe relies on).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FlowKey<const L: usize> {
    bytes: [u8; L],
}

impl<const L: usize> Default for FlowKey<L> {
    fn default() -> Self {
        FlowKey { bytes: [0; L] }
    }
}

impl<const L: usize> FlowKey<L> {
    /// Number of bits in the key.
    pub const BIT_LEN: usize = L * 8;

    /// Wraps a byte array as a key.
    pub const fn new(bytes: [u8; L]) -> Self {
        FlowKey { bytes }
    }

    /// The raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bit `i` of the key, little-endian within each byte.
    #[inline]
    pub fn bit(&self, i: usize) -> bool {
        debug_assert!(i < Self::BIT_LEN);
        (self.bytes[i >> 3] >> (i & 7)) & 1 == 1
    }

    /// Sets bit `i` of the key.
    #[inline]
    pub fn set_bit(&mut self, i: usize, value: bool) {
        debug_assert!(i < Self::BIT_LEN);
        if value {
            self.bytes[i >> 3] |= 1 << (i & 7);
        } else {
            self.bytes[i >> 3] &= !(1 << (i & 7));
        }
    }

    /// Whether the key is all zeroes (the empty-slot sentinel).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }

    /// XOR-accumulates `other` into this key (Flow Radar cell encoding).
    #[inline]
    pub fn xor_assign(&mut self, other: &FlowKey<L>) {
        for (a, b) in self.bytes.iter_mut().zip(other.bytes.iter()) {
            *a ^= b;
        }
    }
}

/// How a record contributes to counters.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
pub enum CntMethod {
    /// Every record counts 1.
    #[default]
    InPacket,
    /// Every record counts its byte length.
    InLength,
}

/// One record of the input stream: a flow key plus the record's byte
/// length. The driver decides whether length or packet count is the
/// update weight.
#[derive(Clone, Copy, Debug)]
pub struct StreamRecord<const L: usize> {
    /// Flow this record belongs to.
    pub key: FlowKey<L>,
    /// Byte length of the record.
    pub length: u32,
}

impl<const L: usize> StreamRecord<L> {
    /// Creates a record.
    pub const fn new(key: FlowKey<L>, length: u32) -> Self {
        StreamRecord { key, length }
    }

    /// The update weight of this record under `method`.
    #[inline]
    pub fn weight(&self, method: CntMethod) -> u32 {
        match method {
            CntMethod::InPacket => 1,
            CntMethod::InLength => self.length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_access_round_trips() {
        let mut key = FlowKey::<4>::default();
        assert!(key.is_empty());
        key.set_bit(0, true);
        key.set_bit(9, true);
        key.set_bit(31, true);
        assert!(key.bit(0) && key.bit(9) && key.bit(31));
        assert!(!key.bit(1) && !key.bit(8));
        assert_eq!(key.as_bytes(), &[0b0000_0001, 0b0000_0010, 0, 0b1000_0000]);
        key.set_bit(9, false);
        assert!(!key.bit(9));
    }

    #[test]
    fn xor_cancels() {
        let a = FlowKey::new([1, 2, 3]);
        let b = FlowKey::new([4, 5, 6]);
        let mut cell = FlowKey::default();
        cell.xor_assign(&a);
        cell.xor_assign(&b);
        cell.xor_assign(&a);
        assert_eq!(cell, b);
    }

    #[test]
    fn record_weight_follows_method() {
        let rec = StreamRecord::new(FlowKey::new([7; 13]), 1500);
        assert_eq!(rec.weight(CntMethod::InPacket), 1);
        assert_eq!(rec.weight(CntMethod::InLength), 1500);
    }
}
