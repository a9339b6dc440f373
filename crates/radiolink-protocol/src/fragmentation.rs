//! Splitting datagrams into link-sized fragments.

use radiolink_core::{
    constants::{MAX_DATAGRAM_SIZE, MAX_FRAGMENTS},
    Config,
};
use thiserror::Error;

/// Why a datagram cannot be fragmented.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FragmentationError {
    /// The datagram exceeds the size limit.
    #[error("datagram of {size} bytes exceeds the limit of {limit}")]
    TooLarge {
        /// Datagram size.
        size: usize,
        /// Applicable limit.
        limit: usize,
    },
    /// More fragments than one ack bitmap can describe.
    #[error("datagram needs {count} fragments, at most 32 are addressable")]
    TooManyFragments {
        /// Fragments required.
        count: usize,
    },
    /// An offset does not fit the one-byte offset field.
    #[error("fragment offset {offset} is not representable")]
    OffsetOverflow {
        /// Offending byte offset.
        offset: usize,
    },
}

/// Position of one fragment within its datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentSlot {
    /// Fragment index.
    pub sequence: u8,
    /// Byte offset into the datagram.
    pub offset: usize,
    /// Payload length.
    pub len: usize,
    /// Offset as carried in the fragment header, in offset units.
    pub wire_offset: u8,
}

/// Computes fragment layouts for a fixed link capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragmenter {
    capacity: usize,
    offset_unit: usize,
    max_datagram_size: usize,
}

impl Fragmenter {
    /// Creates a fragmenter for `capacity` payload bytes per fragment.
    ///
    /// `capacity` must be a positive multiple of `offset_unit`.
    pub fn new(capacity: usize, offset_unit: usize) -> Self {
        assert!(offset_unit > 0 && capacity > 0 && capacity % offset_unit == 0);
        Self { capacity, offset_unit, max_datagram_size: MAX_DATAGRAM_SIZE }
    }

    /// Creates a fragmenter sized from the stack configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut fragmenter = Self::new(config.fragment_capacity(), config.fragment_offset_unit);
        fragmenter.max_datagram_size = config.max_datagram_size.min(MAX_DATAGRAM_SIZE);
        fragmenter
    }

    /// Payload bytes per fragment.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Splits a datagram of `len` bytes into fixed-size segments, the last one shorter.
    pub fn plan(&self, len: usize) -> Result<Vec<FragmentSlot>, FragmentationError> {
        if len > self.max_datagram_size {
            return Err(FragmentationError::TooLarge { size: len, limit: self.max_datagram_size });
        }
        let count = (len + self.capacity - 1) / self.capacity;
        if count > MAX_FRAGMENTS {
            return Err(FragmentationError::TooManyFragments { count });
        }

        let mut slots = Vec::with_capacity(count);
        for index in 0..count {
            let offset = index * self.capacity;
            slots.push(FragmentSlot {
                sequence: index as u8,
                offset,
                len: self.capacity.min(len - offset),
                wire_offset: self.encode_offset(offset)?,
            });
        }
        Ok(slots)
    }

    /// Converts a byte offset into the wire offset field.
    pub fn encode_offset(&self, offset: usize) -> Result<u8, FragmentationError> {
        if offset % self.offset_unit != 0 {
            return Err(FragmentationError::OffsetOverflow { offset });
        }
        u8::try_from(offset / self.offset_unit)
            .map_err(|_| FragmentationError::OffsetOverflow { offset })
    }

    /// Converts the wire offset field into a byte offset.
    pub fn decode_offset(&self, offset: u8) -> usize {
        offset as usize * self.offset_unit
    }
}
