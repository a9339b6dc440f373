//! Sender side of the fragmentation layer.
//!
//! A session owns the datagram until it is confirmed. Each round queues a set of
//! fragments; with selective acks the last one of the round asks for an ack, and the
//! session then waits for it until the retransmission timeout.

use std::time::{Duration, Instant};

use radiolink_core::{Completion, LocalDatagramId, NodeId, PacketBuffer, SendStatus};
use radiolink_protocol::{AckBitmap, FragmentHeader, FragmentSlot, RtoEstimator};

/// Metadata attached to the confirmation of a fragmented datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentTxInfo {
    /// Fragments the datagram was split into.
    pub fragments: usize,
    /// Rounds used, including the first.
    pub rounds: u8,
    /// Fragments sent more than once.
    pub retransmissions: u32,
}

/// A fragment to put in the transmit queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledFragment {
    /// Fragment index.
    pub sequence: u8,
    /// Send with the ack-request dispatch.
    pub ack_request: bool,
    /// Round the fragment was scheduled in.
    pub round: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Sending,
    AwaitingAck { deadline: Instant },
}

/// Effect of a lower-layer confirmation on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentSent {
    /// Nothing to do yet.
    Pending,
    /// Every fragment is confirmed.
    Complete,
    /// The session failed with this status.
    Failed(SendStatus),
}

/// Effect of an inbound ack on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The receiver gave up on the datagram.
    Aborted,
    /// Same bitmap as last time while no ack was awaited.
    Ignored,
    /// Recorded; no ack was awaited so nothing is resent.
    Noted,
    /// Every fragment is acknowledged.
    Complete,
    /// Fragments are missing and no round is left.
    Exhausted,
    /// Resend these fragments in a new round.
    Retransmit(AckBitmap),
}

/// Effect of a retransmission timeout on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtoOutcome {
    /// Resend this fragment with an ack request.
    Resend(u8),
    /// No round is left.
    Exhausted,
    /// Nothing is missing.
    Complete,
}

/// One outgoing fragmented datagram.
#[derive(Debug)]
pub struct FragmentationSession {
    id: LocalDatagramId,
    datagram: Vec<u8>,
    slots: Vec<FragmentSlot>,
    completion: Completion,
    acked: AckBitmap,
    round: u8,
    retransmissions: u32,
    ack_enabled: bool,
    phase: Phase,
    last_ack: Option<AckBitmap>,
    ack_requested_at: Option<Instant>,
    rto_expired: bool,
}

impl FragmentationSession {
    /// Creates a session for `datagram` laid out as `slots`.
    pub fn new(
        id: LocalDatagramId,
        datagram: Vec<u8>,
        slots: Vec<FragmentSlot>,
        completion: Completion,
        ack_enabled: bool,
    ) -> Self {
        Self {
            id,
            datagram,
            slots,
            completion,
            acked: AckBitmap::EMPTY,
            round: 0,
            retransmissions: 0,
            ack_enabled,
            phase: Phase::Sending,
            last_ack: None,
            ack_requested_at: None,
            rto_expired: false,
        }
    }

    /// Session key.
    pub fn id(&self) -> LocalDatagramId {
        self.id
    }

    /// Receiver of the datagram.
    pub fn destination(&self) -> NodeId {
        self.id.destination
    }

    /// Bitmap covering every fragment of the datagram.
    pub fn all(&self) -> AckBitmap {
        AckBitmap::first(self.slots.len())
    }

    /// Fragments confirmed so far.
    pub fn acked(&self) -> AckBitmap {
        self.acked
    }

    /// Current round; the first one is 0.
    pub fn round(&self) -> u8 {
        self.round
    }

    /// When the awaited ack is overdue.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::AwaitingAck { deadline } => Some(deadline),
            Phase::Sending => None,
        }
    }

    /// Lists `fragments` for transmission; the last one asks for an ack.
    pub fn schedule(&mut self, fragments: AckBitmap) -> Vec<ScheduledFragment> {
        self.phase = Phase::Sending;
        if self.round > 0 {
            self.retransmissions += fragments.count();
        }
        let last = fragments.last();
        let round = self.round;
        fragments
            .iter()
            .map(|sequence| ScheduledFragment {
                sequence,
                ack_request: self.ack_enabled && Some(sequence) == last,
                round,
            })
            .collect()
    }

    /// Builds the frame for fragment `sequence`.
    pub fn fragment_buffer(&self, sequence: u8, ack_request: bool) -> Option<PacketBuffer> {
        let slot = self.slots.get(sequence as usize)?;
        let mut buffer = PacketBuffer::from_slice(&self.datagram[slot.offset..slot.offset + slot.len]);
        FragmentHeader {
            ack_request,
            offset: slot.wire_offset,
            tag: self.id.tag,
            sequence,
            datagram_size: self.id.size,
        }
        .write_to(&mut buffer);
        Some(buffer)
    }

    /// Records the lower layer's confirmation of one fragment.
    pub fn fragment_confirmed(
        &mut self,
        fragment: ScheduledFragment,
        status: SendStatus,
        now: Instant,
        rto: Duration,
    ) -> FragmentSent {
        if self.ack_enabled {
            // The ack, or its absence, decides; the link-layer status does not.
            // A request from an earlier round must not interrupt the current one.
            if fragment.ack_request && fragment.round == self.round {
                self.phase = Phase::AwaitingAck { deadline: now + rto };
                self.ack_requested_at = Some(now);
            }
            return FragmentSent::Pending;
        }

        if !status.is_success() {
            return FragmentSent::Failed(status);
        }
        self.acked.insert(fragment.sequence);
        if self.acked.missing_from(self.all()).is_empty() {
            FragmentSent::Complete
        } else {
            FragmentSent::Pending
        }
    }

    /// Processes an ack bitmap from the receiver.
    pub fn on_ack(
        &mut self,
        bitmap: AckBitmap,
        now: Instant,
        max_rounds: u8,
        rto: &mut RtoEstimator,
    ) -> AckOutcome {
        if bitmap.is_empty() {
            return AckOutcome::Aborted;
        }
        let awaiting = matches!(self.phase, Phase::AwaitingAck { .. });
        if !awaiting && self.last_ack == Some(bitmap) {
            return AckOutcome::Ignored;
        }
        self.last_ack = Some(bitmap);

        if awaiting {
            // Karn: an ack following a timeout cannot be attributed to one request.
            if !self.rto_expired {
                if let Some(requested_at) = self.ack_requested_at {
                    rto.update(now.saturating_duration_since(requested_at));
                }
            }
            self.rto_expired = false;
        }

        self.acked = AckBitmap::from_bits((self.acked.bits() | bitmap.bits()) & self.all().bits());
        let missing = self.acked.missing_from(self.all());
        if missing.is_empty() {
            return AckOutcome::Complete;
        }
        if !awaiting {
            return AckOutcome::Noted;
        }
        self.phase = Phase::Sending;
        if self.round >= max_rounds {
            return AckOutcome::Exhausted;
        }
        self.round += 1;
        AckOutcome::Retransmit(missing)
    }

    /// Handles expiry of the ack deadline.
    pub fn on_rto(&mut self, max_rounds: u8) -> RtoOutcome {
        self.phase = Phase::Sending;
        let Some(highest) = self.acked.missing_from(self.all()).last() else {
            return RtoOutcome::Complete;
        };
        if self.round >= max_rounds {
            return RtoOutcome::Exhausted;
        }
        self.round += 1;
        self.rto_expired = true;
        RtoOutcome::Resend(highest)
    }

    /// Consumes the session, returning its completion handle and summary.
    pub fn finish(self) -> (Completion, FragmentTxInfo) {
        let info = FragmentTxInfo {
            fragments: self.slots.len(),
            rounds: self.round + 1,
            retransmissions: self.retransmissions,
        };
        (self.completion, info)
    }
}
