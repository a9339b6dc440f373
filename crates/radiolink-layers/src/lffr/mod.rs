//! Fragmentation and reassembly with selective fragment recovery.
//!
//! Datagrams that fit one frame are sent with the unfragmented dispatch. Larger ones are
//! split into fragments sharing a tag; the receiver reassembles them in any order and,
//! when asked, answers with a bitmap of what it holds, so that only missing fragments
//! are sent again.
//!
//! Every outgoing frame (unfragmented datagrams, fragments and acks) goes through one
//! transmit queue, and only one frame is with the layer below at a time. Confirmations
//! from below are parked in a report queue and processed from the `lffr.pump` loop
//! action. The `lffr.timer` action covers ack deadlines and reassembly timeouts.

mod reassembly;
mod sender;

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    fmt,
    rc::Rc,
    time::Duration,
};

use radiolink_core::{
    error::Result, Completion, Config, LocalDatagramId, NodeId, ReceiveIndication,
    SendConfirmation, SendRequest, SendStatus,
};
use radiolink_protocol::{
    frame::write_unfragmented, parse_frame, AckBitmap, AckFrame, FragmentHeader, Fragmenter,
    Frame, RtoEstimator,
};
use radiolink_runtime::{ActionId, Actions, Component, Scheduler, SchedulerHandle, Stage};
use tracing::{debug, trace, warn};

pub use reassembly::{FragmentOutcome, FragmentReceipt, Reassembler, ReassemblySession};
pub use sender::{
    AckOutcome, FragmentSent, FragmentTxInfo, FragmentationSession, RtoOutcome,
    ScheduledFragment,
};

use crate::statistics::LffrStatistics;

/// A frame waiting for its turn.
#[derive(Debug)]
enum Outgoing {
    Whole(SendRequest),
    Fragment { tag: u16, fragment: ScheduledFragment },
    Ack { destination: NodeId, frame: AckFrame },
}

impl Outgoing {
    fn belongs_to(&self, session: u16) -> bool {
        matches!(self, Outgoing::Fragment { tag, .. } if *tag == session)
    }
}

/// What a confirmation from below refers to.
#[derive(Debug)]
enum Sent {
    Whole(Completion),
    Fragment { tag: u16, fragment: ScheduledFragment },
    Ack,
}

#[derive(Debug)]
struct TxReport {
    sent: Sent,
    confirmation: SendConfirmation,
}

/// Loop actions of the fragmentation layer, bound once it sits in its stage.
#[derive(Debug, Clone, Copy)]
pub struct LffrHooks {
    pump: ActionId,
    timer: ActionId,
}

impl LffrHooks {
    /// Binds the actions to `stage`.
    pub fn bind(self, scheduler: &mut Scheduler, stage: &Stage<Lffr>) {
        let pump_stage = stage.clone();
        scheduler.bind(self.pump, move || pump_stage.with(|lffr, actions| lffr.on_pump(actions)));
        let timer_stage = stage.clone();
        scheduler.bind(self.timer, move || timer_stage.with(|lffr, actions| lffr.on_timer(actions)));
    }
}

/// Fragmentation layer component.
pub struct Lffr {
    config: Config,
    fragmenter: Fragmenter,
    scheduler: SchedulerHandle,
    pump: ActionId,
    timer: ActionId,
    reports: Rc<RefCell<VecDeque<TxReport>>>,
    tx_queue: VecDeque<Outgoing>,
    in_flight: bool,
    sessions: HashMap<u16, FragmentationSession>,
    next_tag: u16,
    rto: RtoEstimator,
    reassembler: Reassembler,
    stats: LffrStatistics,
}

impl Lffr {
    /// Creates the layer.
    ///
    /// Fails if `config` does not describe a usable fragment layout.
    pub fn new(config: &Config, scheduler: &mut Scheduler) -> Result<(Self, LffrHooks)> {
        config.validate()?;
        let hooks = LffrHooks { pump: scheduler.action("lffr.pump"), timer: scheduler.action("lffr.timer") };
        let lffr = Self {
            config: config.clone(),
            fragmenter: Fragmenter::from_config(config),
            scheduler: scheduler.handle(),
            pump: hooks.pump,
            timer: hooks.timer,
            reports: Rc::new(RefCell::new(VecDeque::new())),
            tx_queue: VecDeque::with_capacity(config.tx_queue_capacity),
            in_flight: false,
            sessions: HashMap::new(),
            next_tag: rand::random(),
            rto: RtoEstimator::from_config(config),
            reassembler: Reassembler::new(config.max_reassembly_sessions, config.reassembly_timeout),
            stats: LffrStatistics::default(),
        };
        Ok((lffr, hooks))
    }

    /// Counters collected so far.
    pub fn statistics(&self) -> &LffrStatistics {
        &self.stats
    }

    /// Outgoing fragmented datagrams not yet confirmed.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Incoming datagrams being reassembled.
    pub fn reassembly_sessions(&self) -> usize {
        self.reassembler.active_sessions()
    }

    /// Frames waiting in the transmit queue.
    pub fn queued_frames(&self) -> usize {
        self.tx_queue.len()
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto.rto()
    }

    fn submit_fragmented(&mut self, mut request: SendRequest, actions: &mut Actions) {
        let len = request.buffer.len();
        let slots = match self.fragmenter.plan(len) {
            Ok(slots) => slots,
            Err(err) => {
                self.stats.datagrams_failed += 1;
                debug!("Refusing datagram to {}: {}", request.destination, err);
                actions.confirm(request, SendConfirmation::new(SendStatus::InvalidParameter));
                return;
            }
        };

        if self.sessions.len() >= self.config.max_fragmentation_sessions {
            self.stats.datagrams_failed += 1;
            debug!("Refusing datagram to {}: {} sessions in flight", request.destination, self.sessions.len());
            actions.confirm(request, SendConfirmation::new(SendStatus::QueueFull));
            return;
        }
        if self.tx_queue.len() + slots.len() > self.config.tx_queue_capacity {
            self.stats.datagrams_failed += 1;
            self.stats.tx_queue_overflows += 1;
            debug!("Refusing datagram to {}: transmit queue full", request.destination);
            actions.confirm(request, SendConfirmation::new(SendStatus::QueueFull));
            return;
        }

        let tag = self.allocate_tag();
        let id = LocalDatagramId {
            source: self.config.local_address,
            destination: request.destination,
            tag,
            size: len as u16,
        };
        let ack_enabled = self.config.use_selective_ack && !request.destination.is_broadcast();
        let completion = request.take_completion();
        let datagram = std::mem::take(&mut request.buffer).into_vec();

        let mut session = FragmentationSession::new(id, datagram, slots, completion, ack_enabled);
        let scheduled = session.schedule(session.all());
        debug!("Sending {} byte datagram to {} in {} fragments, tag {:#06x}", len, id.destination, scheduled.len(), tag);
        self.sessions.insert(tag, session);
        self.enqueue(tag, scheduled);
    }

    fn allocate_tag(&mut self) -> u16 {
        loop {
            let tag = self.next_tag;
            self.next_tag = self.next_tag.wrapping_add(1);
            if !self.sessions.contains_key(&tag) {
                return tag;
            }
        }
    }

    fn enqueue(&mut self, tag: u16, fragments: Vec<ScheduledFragment>) {
        self.tx_queue.extend(fragments.into_iter().map(|fragment| Outgoing::Fragment { tag, fragment }));
    }

    fn queue_ack(&mut self, destination: NodeId, tag: u16, bitmap: AckBitmap) {
        if self.tx_queue.len() >= self.config.tx_queue_capacity {
            self.stats.tx_queue_overflows += 1;
            debug!("Dropping ack for tag {:#06x} to {}: transmit queue full", tag, destination);
            return;
        }
        let congestion = self.reassembler.active_sessions() >= self.config.ecn_session_threshold;
        self.stats.acks_sent += 1;
        trace!("Acking tag {:#06x} to {} with {:?}", tag, destination, bitmap);
        // Acks go first; the sender is waiting on them.
        self.tx_queue.push_front(Outgoing::Ack {
            destination,
            frame: AckFrame { tag, bitmap, congestion },
        });
    }

    /// Hands the next queued frame to the layer below, if none is there.
    fn transmit_next(&mut self, actions: &mut Actions) {
        if self.in_flight {
            return;
        }
        while let Some(item) = self.tx_queue.pop_front() {
            let (request, sent) = match item {
                Outgoing::Whole(mut request) => {
                    write_unfragmented(&mut request.buffer);
                    let completion = request.take_completion();
                    (request, Sent::Whole(completion))
                }
                Outgoing::Fragment { tag, fragment } => {
                    let Some(session) = self.sessions.get(&tag) else {
                        continue;
                    };
                    let ScheduledFragment { sequence, ack_request, .. } = fragment;
                    let Some(buffer) = session.fragment_buffer(sequence, ack_request) else {
                        continue;
                    };
                    (SendRequest::new(session.destination(), buffer), Sent::Fragment { tag, fragment })
                }
                Outgoing::Ack { destination, frame } => {
                    (SendRequest::new(destination, frame.to_buffer()), Sent::Ack)
                }
            };

            let reports = self.reports.clone();
            let scheduler = self.scheduler.clone();
            let pump = self.pump;
            self.in_flight = true;
            actions.down(request.with_completion(move |confirmation| {
                reports.borrow_mut().push_back(TxReport { sent, confirmation });
                scheduler.replace(pump, Duration::ZERO);
            }));
            return;
        }
    }

    fn on_pump(&mut self, actions: &mut Actions) {
        let reports: Vec<TxReport> = self.reports.borrow_mut().drain(..).collect();
        for report in reports {
            self.in_flight = false;
            self.on_sent(report, actions);
        }
        self.transmit_next(actions);
        self.rearm_timer();
    }

    fn on_sent(&mut self, report: TxReport, actions: &mut Actions) {
        let TxReport { sent, confirmation } = report;
        let status = confirmation.status();
        match sent {
            Sent::Whole(completion) => {
                if status.is_success() {
                    self.stats.datagrams_sent += 1;
                } else {
                    self.stats.datagrams_failed += 1;
                }
                actions.complete(completion, confirmation);
            }
            Sent::Ack => {
                if !status.is_success() {
                    debug!("Ack transmission failed: {}", status);
                }
            }
            Sent::Fragment { tag, fragment } => {
                if status.is_success() {
                    self.stats.fragments_sent += 1;
                }
                let now = self.scheduler.now();
                let rto = self.rto.rto();
                let Some(session) = self.sessions.get_mut(&tag) else {
                    return;
                };
                match session.fragment_confirmed(fragment, status, now, rto) {
                    FragmentSent::Pending => {}
                    FragmentSent::Complete => self.finish(tag, SendStatus::Success, actions),
                    FragmentSent::Failed(status) => self.finish(tag, status, actions),
                }
            }
        }
    }

    fn on_timer(&mut self, actions: &mut Actions) {
        let now = self.scheduler.now();
        let expired: Vec<u16> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.deadline().map_or(false, |deadline| deadline <= now))
            .map(|(tag, _)| *tag)
            .collect();
        for tag in expired {
            self.on_rto(tag, actions);
        }

        let evicted = self.reassembler.evict_stale(now);
        self.stats.reassembly_evictions += evicted as u64;

        self.transmit_next(actions);
        self.rearm_timer();
    }

    fn on_rto(&mut self, tag: u16, actions: &mut Actions) {
        self.stats.rto_expirations += 1;
        self.rto.backoff();
        let Some(session) = self.sessions.get_mut(&tag) else {
            return;
        };
        match session.on_rto(self.config.max_retransmission_rounds) {
            RtoOutcome::Resend(sequence) => {
                let scheduled = session.schedule(AckBitmap::single(sequence));
                self.stats.fragments_retransmitted += scheduled.len() as u64;
                debug!("Ack for tag {:#06x} overdue, resending fragment {}", tag, sequence);
                self.enqueue(tag, scheduled);
            }
            RtoOutcome::Exhausted => {
                warn!("Giving up on tag {:#06x}: no ack after {} rounds", tag, session.round() + 1);
                self.finish(tag, SendStatus::NoAck, actions);
            }
            RtoOutcome::Complete => self.finish(tag, SendStatus::Success, actions),
        }
    }

    fn on_ack(&mut self, source: NodeId, ack: AckFrame, actions: &mut Actions) {
        if ack.congestion {
            self.stats.congestion_notifications += 1;
            debug!("Congestion reported by {}", source);
        }
        let now = self.scheduler.now();
        let max_rounds = self.config.max_retransmission_rounds;
        let Some(session) =
            self.sessions.get_mut(&ack.tag).filter(|session| session.destination() == source)
        else {
            self.stats.unmatched_acks += 1;
            trace!("Ignoring ack for unknown tag {:#06x} from {}", ack.tag, source);
            return;
        };
        self.stats.acks_received += 1;

        match session.on_ack(ack.bitmap, now, max_rounds, &mut self.rto) {
            AckOutcome::Aborted => {
                warn!("Receiver {} aborted tag {:#06x}", source, ack.tag);
                self.finish(ack.tag, SendStatus::FailUnknown, actions);
            }
            AckOutcome::Ignored => self.stats.duplicate_acks += 1,
            AckOutcome::Noted => {}
            AckOutcome::Complete => self.finish(ack.tag, SendStatus::Success, actions),
            AckOutcome::Exhausted => {
                warn!("Giving up on tag {:#06x}: fragments still missing after {} rounds", ack.tag, max_rounds + 1);
                self.finish(ack.tag, SendStatus::NoAck, actions);
            }
            AckOutcome::Retransmit(missing) => self.retransmit(ack.tag, missing),
        }
    }

    fn retransmit(&mut self, tag: u16, missing: AckBitmap) {
        let Some(session) = self.sessions.get_mut(&tag) else {
            return;
        };
        let scheduled = session.schedule(missing);
        debug!("Resending {} fragment(s) of tag {:#06x}", scheduled.len(), tag);
        self.stats.fragments_retransmitted += scheduled.len() as u64;
        self.tx_queue.retain(|item| !item.belongs_to(tag));
        self.enqueue(tag, scheduled);
    }

    fn on_fragment(&mut self, indication: ReceiveIndication, header: FragmentHeader, actions: &mut Actions) {
        self.stats.fragments_received += 1;
        let ReceiveIndication { source, destination, buffer, .. } = indication;
        let offset = self.fragmenter.decode_offset(header.offset);
        let now = self.scheduler.now();

        let receipt = self.reassembler.accept(source, destination, &header, offset, buffer.as_slice(), now);
        match receipt.outcome {
            FragmentOutcome::Accepted | FragmentOutcome::Completed => {}
            FragmentOutcome::Duplicate => self.stats.duplicate_fragments += 1,
            FragmentOutcome::OutOfBounds
            | FragmentOutcome::Overlapping
            | FragmentOutcome::Unmatched => self.stats.fragments_dropped += 1,
            FragmentOutcome::NoRoom => {
                self.stats.fragments_dropped += 1;
                self.stats.reassembly_overflows += 1;
            }
        }

        if let Some(datagram) = receipt.datagram {
            self.stats.datagrams_delivered += 1;
            debug!("Reassembled {} byte datagram from {}", datagram.len(), source);
            actions.up(ReceiveIndication::new(source, destination, datagram));
        }
        if header.ack_request {
            if let Some(bitmap) = receipt.bitmap {
                self.queue_ack(source, header.tag, bitmap);
            }
        }
    }

    fn finish(&mut self, tag: u16, status: SendStatus, actions: &mut Actions) {
        let Some(session) = self.sessions.remove(&tag) else {
            return;
        };
        self.tx_queue.retain(|item| !item.belongs_to(tag));
        if status.is_success() {
            self.stats.datagrams_sent += 1;
        } else {
            self.stats.datagrams_failed += 1;
        }

        let (completion, info) = session.finish();
        trace!("Tag {:#06x} finished: {} after {} round(s)", tag, status, info.rounds);
        actions.complete(completion, SendConfirmation::new(status).with(info));
    }

    fn rearm_timer(&self) {
        let sessions = self.sessions.values().filter_map(FragmentationSession::deadline);
        let Some(deadline) = sessions.chain(self.reassembler.next_deadline()).min() else {
            return;
        };
        let delay = deadline.saturating_duration_since(self.scheduler.now());
        self.scheduler.replace(self.timer, delay);
    }
}

impl Component for Lffr {
    fn handle_request(&mut self, request: SendRequest, actions: &mut Actions) {
        self.stats.datagrams_submitted += 1;
        if request.buffer.len() > self.config.unfragmented_capacity() {
            self.submit_fragmented(request, actions);
        } else if self.tx_queue.len() >= self.config.tx_queue_capacity {
            self.stats.datagrams_failed += 1;
            self.stats.tx_queue_overflows += 1;
            debug!("Refusing datagram to {}: transmit queue full", request.destination);
            actions.confirm(request, SendConfirmation::new(SendStatus::QueueFull));
        } else {
            self.tx_queue.push_back(Outgoing::Whole(request));
        }
        self.transmit_next(actions);
    }

    fn handle_indication(&mut self, mut indication: ReceiveIndication, actions: &mut Actions) {
        let destination = indication.destination;
        if destination != self.config.local_address && !destination.is_broadcast() {
            self.stats.foreign_frames += 1;
            trace!("Ignoring frame from {} for {}", indication.source, destination);
            return;
        }
        match parse_frame(&mut indication.buffer) {
            Ok(Frame::Unfragmented) => {
                self.stats.datagrams_delivered += 1;
                actions.up(indication);
            }
            Ok(Frame::Fragment(header)) => self.on_fragment(indication, header, actions),
            Ok(Frame::Ack(ack)) => self.on_ack(indication.source, ack, actions),
            Err(err) => {
                self.stats.malformed_frames += 1;
                debug!("Dropping frame from {}: {}", indication.source, err);
            }
        }
        self.transmit_next(actions);
        self.rearm_timer();
    }
}

impl fmt::Debug for Lffr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lffr")
            .field("sessions", &self.sessions.len())
            .field("reassembly", &self.reassembler.active_sessions())
            .field("queued", &self.tx_queue.len())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
