//! Selective-acknowledgment bitmap.
//!
//! Fragment `n` of a datagram maps to bit `0x8000_0000 >> n`, so the first fragment is
//! the most significant bit of the 32-bit field as it appears on the wire.

use std::fmt;

use radiolink_core::constants::MAX_FRAGMENTS;

/// Per-fragment received/missing bitmap.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AckBitmap(u32);

impl AckBitmap {
    /// No fragment received. Sent by a receiver to abort a datagram.
    pub const EMPTY: AckBitmap = AckBitmap(0);

    /// Wraps raw wire bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw wire bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Bitmap covering fragments `0..count`.
    pub fn first(count: usize) -> Self {
        let count = count.min(MAX_FRAGMENTS) as u32;
        Self(!u32::MAX.checked_shr(count).unwrap_or(0))
    }

    /// Bitmap with only `sequence` set.
    pub fn single(sequence: u8) -> Self {
        Self(Self::mask(sequence))
    }

    /// Marks `sequence` as received.
    pub fn insert(&mut self, sequence: u8) {
        self.0 |= Self::mask(sequence);
    }

    /// Clears `sequence`.
    pub fn remove(&mut self, sequence: u8) {
        self.0 &= !Self::mask(sequence);
    }

    /// Returns true if `sequence` is set.
    pub fn contains(self, sequence: u8) -> bool {
        (sequence as usize) < MAX_FRAGMENTS && self.0 & Self::mask(sequence) != 0
    }

    /// Returns true when no bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of set bits.
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Fragments of `expected` that this bitmap does not cover.
    pub fn missing_from(self, expected: AckBitmap) -> AckBitmap {
        AckBitmap(expected.0 & !self.0)
    }

    /// Highest set sequence number.
    pub fn last(self) -> Option<u8> {
        match self.0 {
            0 => None,
            bits => Some(31 - bits.trailing_zeros() as u8),
        }
    }

    /// Set sequence numbers in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..MAX_FRAGMENTS as u8).filter(move |&sequence| self.contains(sequence))
    }

    fn mask(sequence: u8) -> u32 {
        assert!((sequence as usize) < MAX_FRAGMENTS, "fragment sequence {} out of range", sequence);
        0x8000_0000 >> sequence
    }
}

impl fmt::Debug for AckBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AckBitmap({:#010X})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fragments() {
        assert_eq!(AckBitmap::first(0).bits(), 0);
        assert_eq!(AckBitmap::first(1).bits(), 0x8000_0000);
        assert_eq!(AckBitmap::first(3).bits(), 0xE000_0000);
        assert_eq!(AckBitmap::first(32).bits(), u32::MAX);
    }

    #[test]
    fn test_missing_fragment_one() {
        let mut received = AckBitmap::EMPTY;
        received.insert(0);
        received.insert(2);
        assert_eq!(received.bits(), 0xA000_0000);

        let missing = received.missing_from(AckBitmap::first(3));
        assert_eq!(missing.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_last_and_count() {
        let mut bitmap = AckBitmap::single(4);
        bitmap.insert(31);
        assert_eq!(bitmap.last(), Some(31));
        assert_eq!(bitmap.count(), 2);
        bitmap.remove(31);
        assert_eq!(bitmap.last(), Some(4));
        assert_eq!(AckBitmap::EMPTY.last(), None);
        assert!(!bitmap.contains(40));
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_sequence_asserts() {
        AckBitmap::single(32);
    }
}
