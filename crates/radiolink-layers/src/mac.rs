//! Channel-access layer: one frame in flight, CSMA handled by the driver.
//!
//! The layer is `Idle` until the driver accepts a frame and `Transmitting` until the
//! driver reports the end of that transmission. Requests arriving while a frame is in
//! flight are refused with [`SendStatus::Busy`].
//!
//! Driver notifications go through [`RadioEvents`], which is safe to call from the
//! radio's interrupt context: a transmission result is parked in a handoff cell and
//! received frames in a bounded channel, and in both cases a loop action is scheduled
//! to do the actual work.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crossbeam_channel::{bounded, Receiver, Sender};
use radiolink_core::{
    driver::{MacTxInfo, RadioDriver, RxInfo, TxFlags, TxResult},
    Completion, NodeId, PacketBuffer, ReceiveIndication, SendConfirmation, SendRequest,
    SendStatus,
};
use radiolink_runtime::{
    ActionId, Actions, Arbiter, Component, Deferred, Lease, Scheduler, SchedulerHandle, Stage,
};
use tracing::{debug, trace, warn};

use crate::statistics::MacStatistics;

/// Arbiter guarding the radio driver.
pub type RadioArbiter = Arbiter<Box<dyn RadioDriver>>;

/// Flags used for every data frame.
const DATA_TX_FLAGS: TxFlags =
    TxFlags::AUTO_ACK.union(TxFlags::BACKOFF).union(TxFlags::CCA);

/// Transmission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacState {
    /// Ready to accept a frame.
    Idle,
    /// A frame is with the driver.
    Transmitting,
}

#[derive(Debug)]
struct TxEnd {
    result: TxResult,
    info: MacTxInfo,
}

#[derive(Debug)]
struct RxFrame {
    buffer: PacketBuffer,
    source: NodeId,
    destination: NodeId,
    info: RxInfo,
}

struct InFlight {
    completion: Completion,
    destination: NodeId,
    context: u32,
    // Held for the whole transmission; released on completion.
    _lease: Lease<Box<dyn RadioDriver>>,
}

/// Entry points the radio driver calls when hardware events occur.
///
/// Cheap to clone and `Send`; none of the methods run component logic.
#[derive(Clone)]
pub struct RadioEvents {
    tx_end: Deferred<TxEnd>,
    rx: Sender<RxFrame>,
    rx_action: ActionId,
    scheduler: SchedulerHandle,
    rx_dropped: Arc<AtomicU64>,
}

impl RadioEvents {
    /// Reports the end of the current transmission.
    pub fn tx_end(&self, result: TxResult, info: MacTxInfo) {
        if self.tx_end.post(TxEnd { result, info }).is_some() {
            warn!("Transmission result overwritten before it was processed");
        }
    }

    /// Hands a received frame to the stack.
    pub fn rx_end(&self, buffer: PacketBuffer, source: NodeId, destination: NodeId, info: RxInfo) {
        match self.rx.try_send(RxFrame { buffer, source, destination, info }) {
            Ok(()) => self.scheduler.replace(self.rx_action, std::time::Duration::ZERO),
            Err(_) => {
                self.rx_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Reports a frame the driver had to discard.
    pub fn rx_dropped(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for RadioEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadioEvents").field("rx_queued", &self.rx.len()).finish()
    }
}

/// Loop actions of the MAC, bound once the MAC sits in its stage.
#[derive(Debug, Clone, Copy)]
pub struct MacHooks {
    tx_end: ActionId,
    rx: ActionId,
}

impl MacHooks {
    /// Binds the actions to `stage`.
    pub fn bind(self, scheduler: &mut Scheduler, stage: &Stage<CsmaMac>) {
        let tx_stage = stage.clone();
        scheduler.bind(self.tx_end, move || tx_stage.with(|mac, actions| mac.on_tx_end(actions)));
        let rx_stage = stage.clone();
        scheduler.bind(self.rx, move || rx_stage.with(|mac, actions| mac.on_rx(actions)));
    }
}

/// CSMA channel-access component.
pub struct CsmaMac {
    arbiter: RadioArbiter,
    state: MacState,
    in_flight: Option<InFlight>,
    tx_end: Deferred<TxEnd>,
    rx: Receiver<RxFrame>,
    rx_dropped: Arc<AtomicU64>,
    next_context: u32,
    stats: MacStatistics,
}

impl CsmaMac {
    /// Creates the MAC over an arbitrated driver.
    ///
    /// Returns the component, the event sink for the driver, and the loop actions to
    /// bind once the component is placed in a [`Stage`].
    pub fn new(
        arbiter: RadioArbiter,
        scheduler: &mut Scheduler,
        rx_queue_capacity: usize,
    ) -> (Self, RadioEvents, MacHooks) {
        let hooks = MacHooks { tx_end: scheduler.action("mac.tx_end"), rx: scheduler.action("mac.rx") };
        let tx_end = Deferred::new(scheduler.handle(), hooks.tx_end);
        let (rx_sender, rx_receiver) = bounded(rx_queue_capacity);
        let rx_dropped = Arc::new(AtomicU64::new(0));

        let events = RadioEvents {
            tx_end: tx_end.clone(),
            rx: rx_sender,
            rx_action: hooks.rx,
            scheduler: scheduler.handle(),
            rx_dropped: rx_dropped.clone(),
        };
        let mac = Self {
            arbiter,
            state: MacState::Idle,
            in_flight: None,
            tx_end,
            rx: rx_receiver,
            rx_dropped,
            next_context: 0,
            stats: MacStatistics::default(),
        };
        (mac, events, hooks)
    }

    /// Current state.
    pub fn state(&self) -> MacState {
        self.state
    }

    /// Destination of the frame in flight.
    pub fn in_flight_destination(&self) -> Option<NodeId> {
        self.in_flight.as_ref().map(|in_flight| in_flight.destination)
    }

    /// Counters collected so far.
    pub fn statistics(&self) -> MacStatistics {
        let mut stats = self.stats.clone();
        stats.incoming_dropped = self.rx_dropped.load(Ordering::Relaxed);
        stats
    }

    /// Switches promiscuous reception.
    ///
    /// Applied at once when the radio is free. During a transmission the change is queued
    /// behind it, and frames submitted before the loop applies it are refused with
    /// `FailUnknown`.
    pub fn set_promiscuous_mode(&self, enabled: bool) {
        match self.arbiter.try_acquire() {
            Some(lease) => lease.with(|driver| driver.set_promiscuous_mode(enabled)),
            None => self
                .arbiter
                .request(move |lease| lease.with(|driver| driver.set_promiscuous_mode(enabled))),
        }
    }

    fn on_tx_end(&mut self, actions: &mut Actions) {
        let Some(TxEnd { result, info }) = self.tx_end.take() else {
            return;
        };
        let Some(in_flight) = self.in_flight.take() else {
            warn!("Transmission end reported while idle: {:?}", result);
            return;
        };
        self.state = MacState::Idle;

        self.stats.retries += info.retries as u64;
        self.stats.cca_retries += info.cca_retries as u64;
        let status = match result {
            TxResult::Success => {
                self.stats.acked += 1;
                SendStatus::Success
            }
            TxResult::NoAck => {
                self.stats.not_acked += 1;
                SendStatus::NoAck
            }
            TxResult::ChannelAccessFailure => {
                self.stats.channel_access_failures += 1;
                SendStatus::ChannelAccessFailure
            }
            TxResult::Invalid => {
                self.stats.invalid += 1;
                SendStatus::InvalidParameter
            }
        };
        trace!(
            "Frame {} to {} finished: {} after {} retries",
            in_flight.context,
            in_flight.destination,
            status,
            info.retries
        );
        actions.complete(in_flight.completion, SendConfirmation::new(status).with(info));
    }

    fn on_rx(&mut self, actions: &mut Actions) {
        while let Ok(frame) = self.rx.try_recv() {
            self.stats.incoming += 1;
            trace!("Received {} bytes from {}", frame.buffer.len(), frame.source);
            actions.up(
                ReceiveIndication::new(frame.source, frame.destination, frame.buffer)
                    .with_metadata(frame.info),
            );
        }
    }
}

impl Component for CsmaMac {
    fn handle_request(&mut self, mut request: SendRequest, actions: &mut Actions) {
        if self.state == MacState::Transmitting {
            self.stats.busy_rejections += 1;
            debug!("Refusing frame to {}: transmission in progress", request.destination);
            actions.confirm(request, SendConfirmation::new(SendStatus::Busy));
            return;
        }

        let Some(lease) = self.arbiter.try_acquire() else {
            self.stats.driver_rejections += 1;
            debug!("Refusing frame to {}: radio held elsewhere", request.destination);
            actions.confirm(request, SendConfirmation::new(SendStatus::FailUnknown));
            return;
        };

        let context = self.next_context;
        self.next_context = self.next_context.wrapping_add(1);
        let destination = request.destination;
        let completion = request.take_completion();
        let buffer = std::mem::take(&mut request.buffer);

        let accepted =
            lease.with(|driver| driver.start_transmit(buffer, destination, DATA_TX_FLAGS, context));
        if !accepted {
            self.stats.driver_rejections += 1;
            debug!("Driver rejected frame {} to {}", context, destination);
            actions.complete(completion, SendConfirmation::new(SendStatus::FailUnknown));
            return;
        }

        self.stats.outgoing += 1;
        self.in_flight = Some(InFlight { completion, destination, context, _lease: lease });
        self.state = MacState::Transmitting;
    }
}

impl fmt::Debug for CsmaMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsmaMac")
            .field("state", &self.state)
            .field("in_flight", &self.in_flight_destination())
            .field("stats", &self.stats)
            .finish()
    }
}
