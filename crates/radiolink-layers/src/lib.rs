#![warn(missing_docs)]

//! radiolink-layers: the components of the link-layer stack.
//!
//! From top to bottom:
//! - [`Lffr`]: fragmentation, reassembly and selective fragment recovery
//! - [`CrcLayer`]: CRC-16 frame trailer
//! - [`CsmaMac`]: one frame at a time to the radio driver
//!
//! Each component is hosted in a `radiolink_runtime::Stage`; the ones with loop work
//! return hooks that bind their scheduler actions to that stage.

/// Integrity layer.
pub mod crc;
/// Fragmentation layer.
pub mod lffr;
/// Channel-access layer.
pub mod mac;
/// Per-layer counters.
pub mod statistics;

pub use crc::CrcLayer;
pub use lffr::{FragmentTxInfo, Lffr, LffrHooks};
pub use mac::{CsmaMac, MacHooks, MacState, RadioArbiter, RadioEvents};
pub use statistics::{CrcStatistics, LffrStatistics, MacStatistics};
