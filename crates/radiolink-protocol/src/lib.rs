#![warn(missing_docs)]

//! radiolink-protocol: wire formats and protocol arithmetic.

/// Selective-acknowledgment bitmap.
pub mod bitmap;
/// CRC-16 frame trailer.
pub mod checksum;
/// Fragment layout computation.
pub mod fragmentation;
/// Fragment, ack and unfragmented frame codecs.
pub mod frame;
/// Retransmission timeout estimation.
pub mod rto;

pub use bitmap::AckBitmap;
pub use fragmentation::{FragmentSlot, Fragmenter, FragmentationError};
pub use frame::{parse_frame, AckFrame, Frame, FragmentHeader};
pub use rto::RtoEstimator;
