//! Receiver side of the fragmentation layer.
//!
//! A session is opened by the fragment at offset 0 and keyed by its
//! [`LocalDatagramId`], so unrelated peers may use the same tag. Fragments are copied
//! into place as they arrive, in any order. Completed datagrams are remembered for one
//! timeout period so that a late ack request can still be answered with the full bitmap.

use std::{
    collections::HashMap,
    ops::Range,
    time::{Duration, Instant},
};

use radiolink_core::{constants::MAX_SEQUENCE, LocalDatagramId, NodeId, PacketBuffer};
use radiolink_protocol::{AckBitmap, FragmentHeader};
use tracing::{trace, warn};

/// Buffer for one datagram being reassembled.
#[derive(Debug)]
pub struct ReassemblySession {
    id: LocalDatagramId,
    data: Vec<u8>,
    received: AckBitmap,
    /// Byte ranges stored so far; never overlapping.
    ranges: Vec<Range<usize>>,
    received_bytes: usize,
    last_activity: Instant,
}

/// What became of one inbound fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Stored in its session.
    Accepted,
    /// Stored, and the datagram is now complete.
    Completed,
    /// Already received before.
    Duplicate,
    /// Does not fit the advertised datagram.
    OutOfBounds,
    /// Covers bytes another fragment already delivered.
    Overlapping,
    /// No session and not the first fragment.
    Unmatched,
    /// No room for another session.
    NoRoom,
}

/// Result of [`Reassembler::accept`].
#[derive(Debug)]
pub struct FragmentReceipt {
    /// What happened to the fragment.
    pub outcome: FragmentOutcome,
    /// Bitmap to put in an ack, if the fragment belongs to a known datagram.
    /// An empty bitmap tells the sender to give up.
    pub bitmap: Option<AckBitmap>,
    /// The complete datagram, once the last missing fragment arrived.
    pub datagram: Option<PacketBuffer>,
}

impl ReassemblySession {
    /// Creates an empty session for `id`.
    pub fn new(id: LocalDatagramId, now: Instant) -> Self {
        Self {
            id,
            data: vec![0; id.size as usize],
            received: AckBitmap::EMPTY,
            ranges: Vec::new(),
            received_bytes: 0,
            last_activity: now,
        }
    }

    /// Session key.
    pub fn id(&self) -> LocalDatagramId {
        self.id
    }

    /// Copies a fragment payload into place.
    pub fn add_fragment(
        &mut self,
        sequence: u8,
        offset: usize,
        payload: &[u8],
        now: Instant,
    ) -> FragmentOutcome {
        if sequence > MAX_SEQUENCE || payload.is_empty() || offset + payload.len() > self.data.len() {
            return FragmentOutcome::OutOfBounds;
        }
        if self.received.contains(sequence) {
            return FragmentOutcome::Duplicate;
        }
        let range = offset..offset + payload.len();
        if self.ranges.iter().any(|held| held.start < range.end && range.start < held.end) {
            return FragmentOutcome::Overlapping;
        }

        self.data[range.clone()].copy_from_slice(payload);
        self.ranges.push(range);
        self.received.insert(sequence);
        self.received_bytes += payload.len();
        self.last_activity = now;

        if self.is_complete() {
            FragmentOutcome::Completed
        } else {
            FragmentOutcome::Accepted
        }
    }

    /// Returns true once every byte has arrived.
    pub fn is_complete(&self) -> bool {
        self.received_bytes == self.data.len()
    }

    /// Fragments received so far.
    pub fn received(&self) -> AckBitmap {
        self.received
    }

    /// Time of the last accepted fragment.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Consumes the session, returning the datagram.
    pub fn into_datagram(self) -> PacketBuffer {
        PacketBuffer::from(self.data)
    }
}

#[derive(Debug, Clone, Copy)]
struct CompletedDatagram {
    bitmap: AckBitmap,
    completed_at: Instant,
}

/// All reassembly sessions of a node.
#[derive(Debug)]
pub struct Reassembler {
    sessions: HashMap<LocalDatagramId, ReassemblySession>,
    completed: HashMap<LocalDatagramId, CompletedDatagram>,
    max_sessions: usize,
    timeout: Duration,
}

impl Reassembler {
    /// Creates a reassembler holding at most `max_sessions` incomplete datagrams.
    pub fn new(max_sessions: usize, timeout: Duration) -> Self {
        Self { sessions: HashMap::new(), completed: HashMap::new(), max_sessions, timeout }
    }

    /// Incomplete sessions currently held.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Routes one fragment to its session.
    pub fn accept(
        &mut self,
        source: NodeId,
        destination: NodeId,
        header: &FragmentHeader,
        offset: usize,
        payload: &[u8],
        now: Instant,
    ) -> FragmentReceipt {
        let id = LocalDatagramId { source, destination, tag: header.tag, size: header.datagram_size };

        if let Some(session) = self.sessions.get_mut(&id) {
            let outcome = session.add_fragment(header.sequence, offset, payload, now);
            let bitmap = Some(session.received());
            if outcome != FragmentOutcome::Completed {
                return FragmentReceipt { outcome, bitmap, datagram: None };
            }
            return self.complete(id, now);
        }

        if let Some(done) = self.completed.get(&id) {
            return FragmentReceipt {
                outcome: FragmentOutcome::Duplicate,
                bitmap: Some(done.bitmap),
                datagram: None,
            };
        }

        if offset != 0 {
            trace!("Dropping fragment {} of unknown datagram {:?}", header.sequence, id);
            return FragmentReceipt { outcome: FragmentOutcome::Unmatched, bitmap: None, datagram: None };
        }

        if self.sessions.len() >= self.max_sessions {
            warn!("No room to reassemble datagram {:?}: {} sessions active", id, self.sessions.len());
            return FragmentReceipt {
                outcome: FragmentOutcome::NoRoom,
                bitmap: Some(AckBitmap::EMPTY),
                datagram: None,
            };
        }

        let mut session = ReassemblySession::new(id, now);
        let outcome = session.add_fragment(header.sequence, offset, payload, now);
        let bitmap = Some(session.received());
        match outcome {
            FragmentOutcome::Accepted => {
                self.sessions.insert(id, session);
                FragmentReceipt { outcome, bitmap, datagram: None }
            }
            FragmentOutcome::Completed => {
                self.sessions.insert(id, session);
                self.complete(id, now)
            }
            _ => FragmentReceipt { outcome, bitmap: None, datagram: None },
        }
    }

    /// Drops sessions idle for at least the timeout, and forgets old completions.
    ///
    /// Returns the number of incomplete sessions dropped.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let stale: Vec<LocalDatagramId> = self
            .sessions
            .iter()
            .filter(|(_, session)| now.saturating_duration_since(session.last_activity()) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        if !stale.is_empty() {
            warn!(
                "Dropping {} incomplete reassembly session(s) idle for {:?}",
                stale.len(),
                timeout
            );
            for id in &stale {
                self.sessions.remove(id);
            }
        }

        self.completed
            .retain(|_, done| now.saturating_duration_since(done.completed_at) < timeout);
        stale.len()
    }

    /// When [`Reassembler::evict_stale`] next has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let sessions = self.sessions.values().map(|session| session.last_activity());
        let completed = self.completed.values().map(|done| done.completed_at);
        sessions.chain(completed).min().map(|oldest| oldest + self.timeout)
    }

    fn complete(&mut self, id: LocalDatagramId, now: Instant) -> FragmentReceipt {
        let Some(session) = self.sessions.remove(&id) else {
            return FragmentReceipt { outcome: FragmentOutcome::Unmatched, bitmap: None, datagram: None };
        };
        let bitmap = session.received();
        self.completed.insert(id, CompletedDatagram { bitmap, completed_at: now });
        FragmentReceipt {
            outcome: FragmentOutcome::Completed,
            bitmap: Some(bitmap),
            datagram: Some(session.into_datagram()),
        }
    }
}
