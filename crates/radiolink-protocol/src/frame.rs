//! Fragmentation-layer frame formats.
//!
//! Every frame starts with a dispatch byte:
//!
//! ```text
//! unfragmented  0x41 | payload
//! fragment      0xE8/0xE9 | offset | tag (u16) | seq:5 size_hi:3 | size_lo | payload
//! ack           0xEA/0xEB | tag (u16) | bitmap (u32)
//! ```
//!
//! Multi-byte fields are big-endian. `0xE9` asks the receiver for an ack, `0xEB` is an
//! ack carrying the congestion bit.

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use radiolink_core::{
    constants::{ACK_FRAME_SIZE, FRAGMENT_HEADER_SIZE, MAX_DATAGRAM_SIZE, MAX_SEQUENCE},
    error::DecodingErrorKind,
    PacketBuffer,
};

use crate::bitmap::AckBitmap;

/// Dispatch byte values.
pub mod dispatch {
    /// Unfragmented datagram.
    pub const UNFRAGMENTED: u8 = 0x41;
    /// Fragment, no ack requested.
    pub const FRAGMENT: u8 = 0xE8;
    /// Fragment, ack requested.
    pub const FRAGMENT_ACK_REQUEST: u8 = 0xE9;
    /// Selective ack.
    pub const ACK: u8 = 0xEA;
    /// Selective ack with explicit congestion notification.
    pub const ACK_CONGESTION: u8 = 0xEB;
}

/// Packs a 5-bit sequence number and the top 3 bits of an 11-bit datagram size.
///
/// Layout: `sss sshhh` where `s` is the sequence (high bits) and `h` the size bits 10..8.
pub fn pack_sequence_and_size(sequence: u8, datagram_size: u16) -> u8 {
    debug_assert!(sequence <= MAX_SEQUENCE);
    debug_assert!(datagram_size as usize <= MAX_DATAGRAM_SIZE);
    ((sequence & 0x1F) << 3) | ((datagram_size >> 8) as u8 & 0x07)
}

/// Inverse of [`pack_sequence_and_size`], given the low size byte.
pub fn unpack_sequence_and_size(packed: u8, size_low: u8) -> (u8, u16) {
    let sequence = (packed >> 3) & 0x1F;
    let size = (((packed & 0x07) as u16) << 8) | size_low as u16;
    (sequence, size)
}

/// Header in front of every fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentHeader {
    /// The receiver should answer with an ack.
    pub ack_request: bool,
    /// Offset of the payload, in offset units.
    pub offset: u8,
    /// Sender-chosen datagram tag.
    pub tag: u16,
    /// Fragment index within the datagram.
    pub sequence: u8,
    /// Size of the whole datagram.
    pub datagram_size: u16,
}

impl FragmentHeader {
    /// Serialises the header.
    pub fn encode(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; FRAGMENT_HEADER_SIZE];
        bytes[0] =
            if self.ack_request { dispatch::FRAGMENT_ACK_REQUEST } else { dispatch::FRAGMENT };
        bytes[1] = self.offset;
        BigEndian::write_u16(&mut bytes[2..4], self.tag);
        bytes[4] = pack_sequence_and_size(self.sequence, self.datagram_size);
        bytes[5] = self.datagram_size as u8;
        bytes
    }

    /// Parses a header from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodingErrorKind> {
        let truncated =
            |_| DecodingErrorKind::Truncated { needed: FRAGMENT_HEADER_SIZE, available: bytes.len() };
        let mut cursor = Cursor::new(bytes);

        let ack_request = match cursor.read_u8().map_err(truncated)? {
            dispatch::FRAGMENT => false,
            dispatch::FRAGMENT_ACK_REQUEST => true,
            other => return Err(DecodingErrorKind::UnknownDispatch(other)),
        };
        let offset = cursor.read_u8().map_err(truncated)?;
        let tag = cursor.read_u16::<BigEndian>().map_err(truncated)?;
        let packed = cursor.read_u8().map_err(truncated)?;
        let size_low = cursor.read_u8().map_err(truncated)?;
        let (sequence, datagram_size) = unpack_sequence_and_size(packed, size_low);

        Ok(Self { ack_request, offset, tag, sequence, datagram_size })
    }

    /// Prepends the header to a fragment payload.
    pub fn write_to(&self, buffer: &mut PacketBuffer) {
        buffer.push_front(&self.encode());
    }
}

/// Selective acknowledgment for one datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckFrame {
    /// Tag of the acknowledged datagram.
    pub tag: u16,
    /// Fragments received so far.
    pub bitmap: AckBitmap,
    /// The receiver is short of reassembly resources.
    pub congestion: bool,
}

impl AckFrame {
    /// Serialises the ack.
    pub fn encode(&self) -> [u8; ACK_FRAME_SIZE] {
        let mut bytes = [0u8; ACK_FRAME_SIZE];
        bytes[0] = if self.congestion { dispatch::ACK_CONGESTION } else { dispatch::ACK };
        BigEndian::write_u16(&mut bytes[1..3], self.tag);
        BigEndian::write_u32(&mut bytes[3..7], self.bitmap.bits());
        bytes
    }

    /// Parses an ack from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodingErrorKind> {
        let truncated =
            |_| DecodingErrorKind::Truncated { needed: ACK_FRAME_SIZE, available: bytes.len() };
        let mut cursor = Cursor::new(bytes);

        let congestion = match cursor.read_u8().map_err(truncated)? {
            dispatch::ACK => false,
            dispatch::ACK_CONGESTION => true,
            other => return Err(DecodingErrorKind::UnknownDispatch(other)),
        };
        let tag = cursor.read_u16::<BigEndian>().map_err(truncated)?;
        let bitmap = AckBitmap::from_bits(cursor.read_u32::<BigEndian>().map_err(truncated)?);

        Ok(Self { tag, bitmap, congestion })
    }

    /// Builds a buffer holding just this ack.
    pub fn to_buffer(&self) -> PacketBuffer {
        PacketBuffer::from_slice(&self.encode())
    }
}

/// A classified inbound frame; its header has been removed from the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame {
    /// The buffer holds a whole datagram.
    Unfragmented,
    /// The buffer holds the payload of one fragment.
    Fragment(FragmentHeader),
    /// A control frame; the buffer is empty.
    Ack(AckFrame),
}

/// Prepends the unfragmented dispatch byte.
pub fn write_unfragmented(buffer: &mut PacketBuffer) {
    buffer.push_front(&[dispatch::UNFRAGMENTED]);
}

/// Classifies `buffer` by its dispatch byte and strips the header.
///
/// On error the buffer is left as it was.
pub fn parse_frame(buffer: &mut PacketBuffer) -> Result<Frame, DecodingErrorKind> {
    let head = buffer
        .peek_front()
        .ok_or(DecodingErrorKind::Truncated { needed: 1, available: 0 })?;

    let (frame, header_len) = match head {
        dispatch::UNFRAGMENTED => (Frame::Unfragmented, 1),
        dispatch::FRAGMENT | dispatch::FRAGMENT_ACK_REQUEST => {
            (Frame::Fragment(FragmentHeader::decode(buffer.as_slice())?), FRAGMENT_HEADER_SIZE)
        }
        dispatch::ACK | dispatch::ACK_CONGESTION => {
            (Frame::Ack(AckFrame::decode(buffer.as_slice())?), buffer.len())
        }
        other => return Err(DecodingErrorKind::UnknownDispatch(other)),
    };

    let mut header = vec![0u8; header_len];
    buffer
        .pop_front(&mut header)
        .map_err(|_| DecodingErrorKind::Truncated { needed: header_len, available: buffer.len() })?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_sequence_and_size_layout() {
        // sequence 5, size 0x5AC: 00101 101 | 0xAC
        assert_eq!(pack_sequence_and_size(5, 0x5AC), 0b0010_1101);
        assert_eq!(unpack_sequence_and_size(0b0010_1101, 0xAC), (5, 0x5AC));
    }

    #[test]
    fn test_pack_sequence_and_size_extremes() {
        for &(sequence, size) in &[(0u8, 0u16), (31, 2047), (31, 0), (0, 2047), (16, 256)] {
            let packed = pack_sequence_and_size(sequence, size);
            assert_eq!(unpack_sequence_and_size(packed, size as u8), (sequence, size));
        }
    }

    #[test]
    fn test_fragment_header_wire_order() {
        let header = FragmentHeader {
            ack_request: true,
            offset: 25,
            tag: 0xBEEF,
            sequence: 2,
            datagram_size: 300,
        };
        assert_eq!(header.encode(), [0xE9, 25, 0xBE, 0xEF, (2 << 3) | 0x01, 0x2C]);
        assert_eq!(FragmentHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_fragment_header_truncated() {
        let err = FragmentHeader::decode(&[0xE8, 0, 1]).unwrap_err();
        assert_eq!(err, DecodingErrorKind::Truncated { needed: 6, available: 3 });
    }

    #[test]
    fn test_ack_frame_wire_order() {
        let ack =
            AckFrame { tag: 0x0102, bitmap: AckBitmap::from_bits(0xA000_0000), congestion: false };
        assert_eq!(ack.encode(), [0xEA, 0x01, 0x02, 0xA0, 0, 0, 0]);

        let congested = AckFrame { congestion: true, ..ack };
        assert_eq!(AckFrame::decode(&congested.encode()).unwrap(), congested);
    }

    #[test]
    fn test_parse_frame_strips_headers() {
        let mut buffer = PacketBuffer::from_slice(b"data");
        let header =
            FragmentHeader { ack_request: false, offset: 0, tag: 7, sequence: 0, datagram_size: 40 };
        header.write_to(&mut buffer);
        assert_eq!(parse_frame(&mut buffer).unwrap(), Frame::Fragment(header));
        assert_eq!(buffer.as_slice(), b"data");

        let mut buffer = PacketBuffer::from_slice(b"ip");
        write_unfragmented(&mut buffer);
        assert_eq!(parse_frame(&mut buffer).unwrap(), Frame::Unfragmented);
        assert_eq!(buffer.as_slice(), b"ip");

        let ack = AckFrame { tag: 9, bitmap: AckBitmap::first(2), congestion: true };
        let mut buffer = ack.to_buffer();
        assert_eq!(parse_frame(&mut buffer).unwrap(), Frame::Ack(ack));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_frame_rejects_unknown_dispatch() {
        let mut buffer = PacketBuffer::from_slice(&[0x00, 1, 2]);
        assert_eq!(parse_frame(&mut buffer), Err(DecodingErrorKind::UnknownDispatch(0x00)));
        assert_eq!(buffer.len(), 3);

        let mut empty = PacketBuffer::new();
        assert!(parse_frame(&mut empty).is_err());
    }
}
