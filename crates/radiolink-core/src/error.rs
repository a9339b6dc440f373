use std::result;

use thiserror::Error;

/// Convenience alias for results produced by radiolink crates.
pub type Result<T> = result::Result<T, ErrorKind>;

/// Errors raised while building or parsing buffers and frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// A buffer operation went out of range.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),
    /// An inbound frame could not be decoded.
    #[error("decoding error: {0}")]
    Decoding(#[from] DecodingErrorKind),
    /// A configuration value is inconsistent with the others.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failures of [`PacketBuffer`](crate::PacketBuffer) push and pop operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Tried to pop more bytes than the buffer holds.
    #[error("tried to take {requested} bytes from a buffer holding {available}")]
    Underflow {
        /// Bytes requested.
        requested: usize,
        /// Bytes available.
        available: usize,
    },
}

/// Reasons a frame fails to decode.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodingErrorKind {
    /// The frame is shorter than the header it claims to carry.
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },
    /// The dispatch byte does not name a known frame type.
    #[error("unknown dispatch byte 0x{0:02X}")]
    UnknownDispatch(u8),
    /// The trailer checksum does not match the payload.
    #[error("checksum mismatch: expected 0x{expected:04X}, computed 0x{computed:04X}")]
    ChecksumMismatch {
        /// Checksum carried by the frame.
        expected: u16,
        /// Checksum computed over the payload.
        computed: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ErrorKind::from(DecodingErrorKind::UnknownDispatch(0x7F));
        assert_eq!(err.to_string(), "decoding error: unknown dispatch byte 0x7F");

        let err = ErrorKind::from(BufferError::Underflow { requested: 4, available: 1 });
        assert!(err.to_string().contains("take 4 bytes"));
    }
}
