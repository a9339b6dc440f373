//! Per-layer counters.
//!
//! Each component keeps its own counters; `LinkStack::statistics` collects a snapshot
//! of all three.

/// Counters of the integrity layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrcStatistics {
    /// Outbound frames that received a trailer
    pub frames_protected: u64,
    /// Inbound frames that passed verification
    pub frames_verified: u64,
    /// Inbound frames shorter than the trailer
    pub dropped_too_short: u64,
    /// Inbound frames whose trailer did not match
    pub dropped_mismatch: u64,
}

impl CrcStatistics {
    /// Total inbound frames dropped.
    pub fn dropped(&self) -> u64 {
        self.dropped_too_short + self.dropped_mismatch
    }
}

/// Counters of the channel-access layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacStatistics {
    /// Frames accepted by the driver
    pub outgoing: u64,
    /// Frames confirmed as delivered
    pub acked: u64,
    /// Frames that ran out of link-layer retries
    pub not_acked: u64,
    /// Frames that never found a clear channel
    pub channel_access_failures: u64,
    /// Frames the driver reported as invalid
    pub invalid: u64,
    /// Requests refused because a frame was in flight
    pub busy_rejections: u64,
    /// Requests the driver refused synchronously
    pub driver_rejections: u64,
    /// Link-layer retransmissions, summed over all frames
    pub retries: u64,
    /// Busy clear-channel assessments, summed over all frames
    pub cca_retries: u64,
    /// Frames received and passed up
    pub incoming: u64,
    /// Frames lost between driver and event loop
    pub incoming_dropped: u64,
}

impl MacStatistics {
    /// Share of completed transmissions that were acknowledged (0.0 to 1.0).
    pub fn delivery_rate(&self) -> f32 {
        let completed = self.acked + self.not_acked + self.channel_access_failures + self.invalid;
        if completed == 0 {
            return 0.0;
        }
        self.acked as f32 / completed as f32
    }
}

/// Counters of the fragmentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LffrStatistics {
    /// Datagrams accepted from the layer above
    pub datagrams_submitted: u64,
    /// Datagrams confirmed successfully
    pub datagrams_sent: u64,
    /// Datagrams that failed or were refused
    pub datagrams_failed: u64,
    /// Fragments confirmed by the layer below
    pub fragments_sent: u64,
    /// Fragments queued again after an ack or timeout
    pub fragments_retransmitted: u64,
    /// Retransmission timeouts
    pub rto_expirations: u64,
    /// Acks queued for transmission
    pub acks_sent: u64,
    /// Acks received and matched to a session
    pub acks_received: u64,
    /// Acks repeating the last processed bitmap
    pub duplicate_acks: u64,
    /// Acks for unknown tags or peers
    pub unmatched_acks: u64,
    /// Acks carrying the congestion bit
    pub congestion_notifications: u64,
    /// Datagrams delivered upward (reassembled or unfragmented)
    pub datagrams_delivered: u64,
    /// Fragments received
    pub fragments_received: u64,
    /// Fragments already received before
    pub duplicate_fragments: u64,
    /// Fragments matching no session, out of bounds, or overlapping
    pub fragments_dropped: u64,
    /// New sessions refused for lack of room
    pub reassembly_overflows: u64,
    /// Incomplete sessions dropped after inactivity
    pub reassembly_evictions: u64,
    /// Frames addressed to another node
    pub foreign_frames: u64,
    /// Frames that failed to parse
    pub malformed_frames: u64,
    /// Frames refused because the transmit queue was full
    pub tx_queue_overflows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_initialized_to_zero() {
        assert_eq!(CrcStatistics::default().dropped(), 0);
        assert_eq!(MacStatistics::default().delivery_rate(), 0.0);
        assert_eq!(LffrStatistics::default().datagrams_sent, 0);
    }

    #[test]
    fn test_delivery_rate() {
        let stats = MacStatistics { acked: 9, not_acked: 1, ..Default::default() };
        assert!((stats.delivery_rate() - 0.9).abs() < 0.001);
    }
}
