//! Byte buffer with header and trailer push/pop.
//!
//! Frames are built by pushing headers in front of a payload while it travels down the
//! stack and parsed by popping them again on the way up. The buffer keeps spare
//! headroom in front of the valid bytes so header pushes normally do not move data.

use std::fmt;

use crate::{constants::DEFAULT_HEADROOM, error::BufferError};

/// Mutable byte sequence with an insertion cursor at each end.
///
/// A buffer is owned by exactly one message at a time; it is moved, never shared.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PacketBuffer {
    storage: Vec<u8>,
    head: usize,
}

impl PacketBuffer {
    /// Creates an empty buffer with the default headroom.
    pub fn new() -> Self {
        Self::with_headroom(DEFAULT_HEADROOM)
    }

    /// Creates an empty buffer reserving `headroom` bytes for headers.
    pub fn with_headroom(headroom: usize) -> Self {
        Self { storage: vec![0; headroom], head: headroom }
    }

    /// Creates a buffer holding a copy of `payload`, with the default headroom.
    pub fn from_slice(payload: &[u8]) -> Self {
        let mut buffer = Self::with_headroom(DEFAULT_HEADROOM);
        buffer.storage.extend_from_slice(payload);
        buffer
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.storage.len() - self.head
    }

    /// Returns true when the buffer holds no valid bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.head..]
    }

    /// The valid bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.head..]
    }

    /// Prepends `header` in front of the valid bytes.
    pub fn push_front(&mut self, header: &[u8]) {
        if header.len() > self.head {
            self.grow_headroom(header.len());
        }
        let start = self.head - header.len();
        self.storage[start..self.head].copy_from_slice(header);
        self.head = start;
    }

    /// Appends `trailer` after the valid bytes.
    pub fn push_back(&mut self, trailer: &[u8]) {
        self.storage.extend_from_slice(trailer);
    }

    /// Removes `out.len()` bytes from the front, copying them into `out`.
    pub fn pop_front(&mut self, out: &mut [u8]) -> Result<(), BufferError> {
        self.ensure(out.len())?;
        let end = self.head + out.len();
        out.copy_from_slice(&self.storage[self.head..end]);
        self.head = end;
        Ok(())
    }

    /// Removes `out.len()` bytes from the back, copying them into `out`.
    pub fn pop_back(&mut self, out: &mut [u8]) -> Result<(), BufferError> {
        self.ensure(out.len())?;
        let start = self.storage.len() - out.len();
        out.copy_from_slice(&self.storage[start..]);
        self.storage.truncate(start);
        Ok(())
    }

    /// Removes a single byte from the front.
    pub fn pop_front_u8(&mut self) -> Result<u8, BufferError> {
        let mut byte = [0u8; 1];
        self.pop_front(&mut byte)?;
        Ok(byte[0])
    }

    /// Returns the first valid byte without removing it.
    pub fn peek_front(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Consumes the buffer, returning only the valid bytes.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.storage.drain(..self.head);
        self.storage
    }

    fn ensure(&self, requested: usize) -> Result<(), BufferError> {
        let available = self.len();
        if requested > available {
            return Err(BufferError::Underflow { requested, available });
        }
        Ok(())
    }

    fn grow_headroom(&mut self, needed: usize) {
        let extra = needed.max(DEFAULT_HEADROOM);
        let mut storage = Vec::with_capacity(extra + self.storage.len());
        storage.resize(extra, 0);
        storage.extend_from_slice(&self.storage);
        self.storage = storage;
        self.head += extra;
    }
}

impl From<Vec<u8>> for PacketBuffer {
    fn from(payload: Vec<u8>) -> Self {
        Self { storage: payload, head: 0 }
    }
}

impl From<&[u8]> for PacketBuffer {
    fn from(payload: &[u8]) -> Self {
        Self::from_slice(payload)
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer").field("len", &self.len()).field("head", &self.head).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_front_uses_headroom() {
        let mut buffer = PacketBuffer::from_slice(&[3, 4]);
        buffer.push_front(&[1, 2]);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_push_front_grows_when_headroom_exhausted() {
        let mut buffer = PacketBuffer::from(vec![9]);
        buffer.push_front(&[7, 8]);
        buffer.push_front(&[0; 40]);
        assert_eq!(buffer.len(), 43);
        assert_eq!(&buffer.as_slice()[40..], &[7, 8, 9]);
    }

    #[test]
    fn test_push_and_pop_trailer() {
        let mut buffer = PacketBuffer::from_slice(b"abc");
        buffer.push_back(&[0xAB, 0xCD]);

        let mut trailer = [0u8; 2];
        buffer.pop_back(&mut trailer).unwrap();
        assert_eq!(trailer, [0xAB, 0xCD]);
        assert_eq!(buffer.as_slice(), b"abc");
    }

    #[test]
    fn test_pop_front() {
        let mut buffer = PacketBuffer::from_slice(&[0xE8, 1, 2, 3]);
        assert_eq!(buffer.peek_front(), Some(0xE8));
        assert_eq!(buffer.pop_front_u8().unwrap(), 0xE8);

        let mut two = [0u8; 2];
        buffer.pop_front(&mut two).unwrap();
        assert_eq!(two, [1, 2]);
        assert_eq!(buffer.into_vec(), vec![3]);
    }

    #[test]
    fn test_pop_underflow_leaves_buffer_intact() {
        let mut buffer = PacketBuffer::from_slice(&[1]);
        let mut trailer = [0u8; 2];
        let err = buffer.pop_back(&mut trailer).unwrap_err();
        assert_eq!(err, BufferError::Underflow { requested: 2, available: 1 });
        assert_eq!(buffer.as_slice(), &[1]);

        assert!(buffer.pop_front(&mut trailer).is_err());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = PacketBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.peek_front(), None);
        assert!(buffer.into_vec().is_empty());
    }
}
