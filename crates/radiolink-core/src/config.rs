use std::{default::Default, time::Duration};

use crate::{
    constants::{
        CRC_TRAILER_SIZE, DEFAULT_MAX_FRAME_PAYLOAD, FRAGMENT_HEADER_SIZE, MAX_DATAGRAM_SIZE,
        MAX_FRAGMENTS, UNFRAGMENTED_HEADER_SIZE,
    },
    error::{ErrorKind, Result},
    message::NodeId,
};

#[derive(Clone, Debug)]
/// Configuration options to tune the link-layer stack.
pub struct Config {
    /// Address of this node; used as the source of outgoing fragmentation sessions.
    pub local_address: NodeId,
    /// Largest payload handed to the radio driver, including the CRC trailer.
    pub max_frame_payload: usize,
    /// Granularity of the fragment offset field in bytes.
    pub fragment_offset_unit: usize,
    /// Largest datagram accepted from the upper layer (at most 2047).
    pub max_datagram_size: usize,
    /// Request selective acknowledgments for fragmented datagrams.
    pub use_selective_ack: bool,
    /// Retransmission rounds allowed after the first before a datagram is abandoned.
    pub max_retransmission_rounds: u8,
    /// Retransmission timeout used before the first round trip is measured.
    pub initial_rto: Duration,
    /// Lower bound for the retransmission timeout.
    pub min_rto: Duration,
    /// Upper bound for the retransmission timeout, also capping backoff.
    pub max_rto: Duration,
    /// Smoothing factor (0..1) for RTT measurements.
    pub rtt_smoothing_factor: f32,
    /// Smoothing factor (0..1) for RTT variance.
    pub rtt_variance_factor: f32,
    /// Inactivity after which an incomplete reassembly is dropped.
    pub reassembly_timeout: Duration,
    /// Concurrent reassembly sessions kept in memory.
    pub max_reassembly_sessions: usize,
    /// Concurrent outgoing fragmented datagrams.
    pub max_fragmentation_sessions: usize,
    /// Frames waiting in the fragmentation layer's transmit queue.
    pub tx_queue_capacity: usize,
    /// Active reassembly sessions at which acks start signalling congestion.
    pub ecn_session_threshold: usize,
    /// Frames buffered between the driver's receive path and the event loop.
    pub rx_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_address: NodeId(0x0001),
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
            fragment_offset_unit: 8,
            max_datagram_size: 1280, // IPv6 minimum MTU
            use_selective_ack: true,
            max_retransmission_rounds: 3,
            initial_rto: Duration::from_millis(1028),
            min_rto: Duration::from_millis(256),
            max_rto: Duration::from_secs(8),
            rtt_smoothing_factor: 0.125,
            rtt_variance_factor: 0.25,
            reassembly_timeout: Duration::from_millis(2000),
            max_reassembly_sessions: 4,
            max_fragmentation_sessions: 4,
            tx_queue_capacity: 40,
            ecn_session_threshold: 3,
            rx_queue_capacity: 8,
        }
    }
}

impl Config {
    /// Payload bytes carried by one fragment: the room left after the CRC trailer and
    /// the fragment header, rounded down to the offset unit.
    pub fn fragment_capacity(&self) -> usize {
        let room = self.max_frame_payload.saturating_sub(CRC_TRAILER_SIZE + FRAGMENT_HEADER_SIZE);
        match self.fragment_offset_unit {
            0 => 0,
            unit => room / unit * unit,
        }
    }

    /// Largest datagram sent without fragmentation.
    pub fn unfragmented_capacity(&self) -> usize {
        self.max_frame_payload.saturating_sub(CRC_TRAILER_SIZE + UNFRAGMENTED_HEADER_SIZE)
    }

    /// Checks that the values are consistent with each other and with the wire format.
    pub fn validate(&self) -> Result<()> {
        if self.fragment_offset_unit == 0 {
            return Err(invalid("fragment_offset_unit must be positive"));
        }
        let capacity = self.fragment_capacity();
        if capacity == 0 {
            return Err(invalid(format!(
                "max_frame_payload {} leaves no room for fragment data",
                self.max_frame_payload
            )));
        }
        if self.max_datagram_size > MAX_DATAGRAM_SIZE {
            return Err(invalid(format!(
                "max_datagram_size {} exceeds the {} byte size field",
                self.max_datagram_size, MAX_DATAGRAM_SIZE
            )));
        }
        if self.max_datagram_size > capacity * MAX_FRAGMENTS {
            return Err(invalid(format!(
                "max_datagram_size {} needs more than {} fragments of {} bytes",
                self.max_datagram_size, MAX_FRAGMENTS, capacity
            )));
        }
        let last_offset = self.max_datagram_size.saturating_sub(1) / capacity * capacity;
        if last_offset / self.fragment_offset_unit > u8::MAX as usize {
            return Err(invalid(format!(
                "offset {} does not fit the offset field with unit {}",
                last_offset, self.fragment_offset_unit
            )));
        }
        if self.min_rto > self.max_rto {
            return Err(invalid("min_rto exceeds max_rto"));
        }
        if self.max_reassembly_sessions == 0 || self.max_fragmentation_sessions == 0 {
            return Err(invalid("session limits must be positive"));
        }
        if self.tx_queue_capacity == 0 || self.rx_queue_capacity == 0 {
            return Err(invalid("queue capacities must be positive"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ErrorKind {
    ErrorKind::InvalidConfig(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fragment_capacity(), 88);
        assert_eq!(config.unfragmented_capacity(), 99);
    }

    #[test]
    fn test_fragment_capacity_rounds_to_unit() {
        let config = Config { max_frame_payload: 108, fragment_offset_unit: 4, ..Default::default() };
        assert_eq!(config.fragment_capacity(), 100);

        let config = Config { max_frame_payload: 111, fragment_offset_unit: 8, ..Default::default() };
        assert_eq!(config.fragment_capacity(), 96);
    }

    #[test]
    fn test_rejects_oversized_datagram_limit() {
        let config = Config { max_datagram_size: 4096, ..Default::default() };
        assert!(matches!(config.validate(), Err(ErrorKind::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_offset_overflow() {
        // 1-byte units cannot address offsets past 255
        let config = Config { fragment_offset_unit: 1, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_too_many_fragments() {
        let config =
            Config { max_frame_payload: 24, max_datagram_size: 1280, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
