#![warn(missing_docs)]

//! radiolink-core: foundational types shared by every layer of the stack.
//!
//! This crate provides:
//! - Configuration types
//! - Error handling
//! - Link-layer constants
//! - The packet buffer and the messages that carry it between components
//! - The radio driver abstraction
//!
//! Wire formats live in `radiolink-protocol`, loop primitives in `radiolink-runtime`
//! and the stack components themselves in `radiolink-layers`.

/// Link-layer constants shared across layers.
pub mod constants {
    /// Size of the CRC-16 trailer appended by the integrity layer.
    pub const CRC_TRAILER_SIZE: usize = 2;
    /// Size of a fragment header including its dispatch byte.
    pub const FRAGMENT_HEADER_SIZE: usize = 6;
    /// Size of an ack frame: dispatch, tag and bitmap.
    pub const ACK_FRAME_SIZE: usize = 7;
    /// Size of the dispatch byte in front of an unfragmented datagram.
    pub const UNFRAGMENTED_HEADER_SIZE: usize = 1;
    /// Largest datagram size expressible in the 11-bit size field.
    pub const MAX_DATAGRAM_SIZE: usize = 0x07FF;
    /// Number of fragments a single selective-ack bitmap can describe.
    pub const MAX_FRAGMENTS: usize = 32;
    /// Largest sequence number that fits the 5-bit sequence field.
    pub const MAX_SEQUENCE: u8 = 31;
    /// Default maximum frame payload handed to the driver.
    ///
    /// 802.15.4 frames carry at most 127 bytes; a short-address data header and the
    /// hardware frame check sequence leave this much for the MAC payload.
    pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 102;
    /// Default headroom reserved in front of a new packet buffer.
    pub const DEFAULT_HEADROOM: usize = 16;
}

/// Configuration options for the stack.
pub mod config;
/// Radio driver abstraction and its value types.
pub mod driver;
/// Error types and results.
pub mod error;
/// Requests, indications and confirmations exchanged between components.
pub mod message;
/// Type-keyed metadata attached to messages.
pub mod metadata;
/// Byte buffer with header and trailer push/pop.
pub mod buffer;

pub use buffer::PacketBuffer;
pub use config::Config;
pub use error::{BufferError, DecodingErrorKind, ErrorKind, Result};
pub use message::{
    Completion, LocalDatagramId, NodeId, ReceiveIndication, SendConfirmation, SendRequest,
    SendStatus,
};
pub use metadata::Metadata;
