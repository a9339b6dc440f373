//! Radio driver abstraction.
//!
//! The driver is the downward collaborator of the channel-access layer. Starting a
//! transmission is synchronous; its completion, and every received frame, are reported
//! asynchronously through the event sink the driver was created with (see
//! `radiolink_layers::RadioEvents`).

use std::time::Duration;

use bitflags::bitflags;

use crate::{buffer::PacketBuffer, constants::DEFAULT_MAX_FRAME_PAYLOAD, message::NodeId};

bitflags! {
    /// Transmission options passed to [`RadioDriver::start_transmit`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TxFlags: u8 {
        /// Request a link-layer acknowledgment and retry until one arrives.
        const AUTO_ACK = 0b0000_0001;
        /// Wait a random backoff before accessing the channel.
        const BACKOFF = 0b0000_0010;
        /// Perform clear-channel assessment before sending.
        const CCA = 0b0000_0100;
    }
}

/// Terminal result of a transmission reported by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxResult {
    /// Sent, and acknowledged if an acknowledgment was requested.
    Success,
    /// No acknowledgment after the driver's retries.
    NoAck,
    /// The channel stayed busy through every clear-channel assessment.
    ChannelAccessFailure,
    /// The driver could not interpret the frame.
    Invalid,
}

/// Per-transmission information reported by the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MacTxInfo {
    /// Destination of the frame.
    pub destination: NodeId,
    /// Retransmissions performed for lack of an acknowledgment.
    pub retries: u8,
    /// Clear-channel assessments that found the channel busy.
    pub cca_retries: u8,
    /// Signal strength reported in the acknowledgment, if any.
    pub remote_rssi: Option<i8>,
    /// Signal strength measured on the acknowledgment, if any.
    pub ack_rssi: Option<i8>,
    /// Time from start to completion.
    pub tx_duration: Duration,
}

/// Link quality of a received frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxInfo {
    /// Received signal strength in dBm.
    pub rssi: i8,
    /// Link quality indicator.
    pub lqi: u8,
}

/// Radio hardware driver.
pub trait RadioDriver {
    /// Starts transmitting `buffer` to `destination`.
    ///
    /// Returns `false` when the driver rejects the frame synchronously; no completion
    /// follows in that case. `context` is echoed back to nobody and exists for drivers
    /// that want to correlate their own bookkeeping.
    fn start_transmit(
        &mut self,
        buffer: PacketBuffer,
        destination: NodeId,
        flags: TxFlags,
        context: u32,
    ) -> bool;

    /// Enables or disables reception of frames addressed to other nodes.
    fn set_promiscuous_mode(&mut self, enabled: bool);

    /// Largest payload a single frame can carry.
    fn max_payload(&self) -> usize {
        DEFAULT_MAX_FRAME_PAYLOAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_flags_compose() {
        let flags = TxFlags::AUTO_ACK | TxFlags::BACKOFF | TxFlags::CCA;
        assert!(flags.contains(TxFlags::CCA));
        assert_eq!(flags.bits(), 0b111);
        assert!(!TxFlags::empty().contains(TxFlags::AUTO_ACK));
    }
}
