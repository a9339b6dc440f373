//! CRC-16 frame trailer.
//!
//! The checksum is the reflected 0x8005 polynomial with initial value 0xFFFF and no
//! final xor, the same value the classic bit-serial `crc16_update` loop produces. It is
//! carried as a 2-byte trailer, most significant byte first.

use byteorder::{BigEndian, ByteOrder};
use crc::{Crc, CRC_16_MODBUS};
use radiolink_core::{
    constants::CRC_TRAILER_SIZE, error::DecodingErrorKind, PacketBuffer,
};

/// CRC-16 algorithm protecting every frame.
pub const LINK_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Computes the link checksum of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    LINK_CRC.checksum(data)
}

/// Appends the checksum of the current payload as a trailer and returns it.
pub fn append_checksum(buffer: &mut PacketBuffer) -> u16 {
    let checksum = crc16(buffer.as_slice());
    let mut trailer = [0u8; CRC_TRAILER_SIZE];
    BigEndian::write_u16(&mut trailer, checksum);
    buffer.push_back(&trailer);
    checksum
}

/// Removes the trailer and checks it against the remaining payload.
///
/// On a mismatch the trailer has already been removed; callers drop the buffer.
pub fn strip_checksum(buffer: &mut PacketBuffer) -> Result<(), DecodingErrorKind> {
    let available = buffer.len();
    let mut trailer = [0u8; CRC_TRAILER_SIZE];
    buffer
        .pop_back(&mut trailer)
        .map_err(|_| DecodingErrorKind::Truncated { needed: CRC_TRAILER_SIZE, available })?;

    let expected = BigEndian::read_u16(&trailer);
    let computed = crc16(buffer.as_slice());
    if expected != computed {
        return Err(DecodingErrorKind::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn crc16_bit_serial(data: &[u8]) -> u16 {
        let mut crc = 0xFFFFu16;
        for &byte in data {
            crc ^= byte as u16;
            for _ in 0..8 {
                crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
            }
        }
        crc
    }

    #[test]
    fn test_matches_bit_serial_update() {
        let data = b"123456789";
        assert_eq!(crc16(data), 0x4B37);
        assert_eq!(crc16(data), crc16_bit_serial(data));
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_append_and_strip() {
        let mut buffer = PacketBuffer::from_slice(b"payload");
        let checksum = append_checksum(&mut buffer);
        assert_eq!(buffer.len(), 9);
        assert_eq!(&buffer.as_slice()[7..], &checksum.to_be_bytes());

        strip_checksum(&mut buffer).unwrap();
        assert_eq!(buffer.as_slice(), b"payload");
    }

    #[test]
    fn test_detects_corruption() {
        let mut buffer = PacketBuffer::from_slice(b"payload");
        append_checksum(&mut buffer);
        buffer.as_mut_slice()[0] ^= 0x01;
        assert!(matches!(
            strip_checksum(&mut buffer),
            Err(DecodingErrorKind::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_single_byte_frame_is_truncated() {
        let mut buffer = PacketBuffer::from_slice(&[0x42]);
        assert_eq!(
            strip_checksum(&mut buffer),
            Err(DecodingErrorKind::Truncated { needed: 2, available: 1 })
        );
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let mut buffer = PacketBuffer::new();
        append_checksum(&mut buffer);
        assert!(strip_checksum(&mut buffer).is_ok());
        assert!(buffer.is_empty());
    }

    proptest! {
        #[test]
        fn prop_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..100)) {
            let mut buffer = PacketBuffer::from_slice(&payload);
            append_checksum(&mut buffer);
            prop_assert!(strip_checksum(&mut buffer).is_ok());
            prop_assert_eq!(buffer.as_slice(), payload.as_slice());
        }

        #[test]
        fn prop_agrees_with_bit_serial(payload in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(crc16(&payload), crc16_bit_serial(&payload));
        }
    }
}
