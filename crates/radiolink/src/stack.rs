//! The assembled stack: fragmentation on top of CRC on top of channel access.

use std::fmt;

use radiolink_core::{driver::RadioDriver, error::Result, Config, ReceiveIndication, SendRequest};
use radiolink_layers::{
    CrcLayer, CrcStatistics, CsmaMac, Lffr, LffrStatistics, MacState, MacStatistics,
    RadioArbiter, RadioEvents,
};
use radiolink_runtime::{connect, InputGate, Scheduler, Stage};
use tracing::debug;

/// Snapshot of every layer's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackStatistics {
    /// Fragmentation layer
    pub lffr: LffrStatistics,
    /// Integrity layer
    pub crc: CrcStatistics,
    /// Channel-access layer
    pub mac: MacStatistics,
}

/// A link-layer stack over one radio driver.
///
/// All methods must be called from the thread running the scheduler loop. Only the
/// [`RadioEvents`] returned by [`LinkStack::radio_events`] may be used elsewhere.
pub struct LinkStack {
    lffr: Stage<Lffr>,
    crc: Stage<CrcLayer>,
    mac: Stage<CsmaMac>,
    input: InputGate<SendRequest>,
    events: RadioEvents,
}

impl LinkStack {
    /// Builds the stack over `driver` and registers its loop actions with `scheduler`.
    ///
    /// The driver reports transmission results and received frames through
    /// [`LinkStack::radio_events`].
    pub fn new(
        config: &Config,
        scheduler: &mut Scheduler,
        driver: impl RadioDriver + 'static,
    ) -> Result<Self> {
        let (lffr, lffr_hooks) = Lffr::new(config, scheduler)?;

        let driver: Box<dyn RadioDriver> = Box::new(driver);
        if driver.max_payload() < config.max_frame_payload {
            debug!(
                "Driver payload limit {} is below the configured frame payload {}",
                driver.max_payload(),
                config.max_frame_payload
            );
        }
        let arbiter = RadioArbiter::new("radio", driver);
        arbiter.attach(scheduler);
        let (mac, events, mac_hooks) = CsmaMac::new(arbiter, scheduler, config.rx_queue_capacity);

        let lffr = Stage::new("lffr", lffr);
        let crc = Stage::new("crc", CrcLayer::new());
        let mac = Stage::new("mac", mac);
        connect(&lffr, &crc);
        connect(&crc, &mac);
        lffr_hooks.bind(scheduler, &lffr);
        mac_hooks.bind(scheduler, &mac);

        debug!(
            "Link stack for {} ready: {} byte frames, {} byte fragments",
            config.local_address,
            config.max_frame_payload,
            config.fragment_capacity()
        );
        let input = lffr.request_input();
        Ok(Self { lffr, crc, mac, input, events })
    }

    /// Submits a datagram. The outcome arrives through the request's completion.
    pub fn send(&self, request: SendRequest) {
        self.input.deliver(request);
    }

    /// Connects the sink receiving datagrams addressed to this node.
    ///
    /// Must be called exactly once, before frames arrive.
    pub fn connect_upper(&self, sink: &InputGate<ReceiveIndication>) {
        self.lffr.upper().connect(sink);
    }

    /// Event sink to hand to the radio driver.
    pub fn radio_events(&self) -> RadioEvents {
        self.events.clone()
    }

    /// Switches promiscuous reception once the radio is free.
    pub fn set_promiscuous_mode(&self, enabled: bool) {
        self.mac.component().set_promiscuous_mode(enabled);
    }

    /// State of the channel-access layer.
    pub fn mac_state(&self) -> MacState {
        self.mac.component().state()
    }

    /// Collects the counters of every layer.
    pub fn statistics(&self) -> StackStatistics {
        StackStatistics {
            lffr: self.lffr.component().statistics().clone(),
            crc: self.crc.component().statistics().clone(),
            mac: self.mac.component().statistics(),
        }
    }
}

impl fmt::Debug for LinkStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkStack")
            .field("lffr", &*self.lffr.component())
            .field("mac", &*self.mac.component())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc, sync::Arc};

    use radiolink_core::{
        driver::{MacTxInfo, TxFlags, TxResult},
        NodeId, PacketBuffer, SendStatus,
    };
    use radiolink_protocol::checksum::crc16;
    use radiolink_runtime::ManualClock;

    use super::*;

    struct RecordingDriver {
        frames: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl RadioDriver for RecordingDriver {
        fn start_transmit(&mut self, buffer: PacketBuffer, _: NodeId, _: TxFlags, _: u32) -> bool {
            self.frames.borrow_mut().push(buffer.into_vec());
            true
        }

        fn set_promiscuous_mode(&mut self, _: bool) {}
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut scheduler = Scheduler::new(Arc::new(ManualClock::new()));
        let frames = Rc::new(RefCell::new(Vec::new()));
        let config = Config { fragment_offset_unit: 0, ..Default::default() };
        assert!(LinkStack::new(&config, &mut scheduler, RecordingDriver { frames }).is_err());
    }

    #[test]
    fn test_frame_passes_every_layer() {
        let mut scheduler = Scheduler::new(Arc::new(ManualClock::new()));
        let frames = Rc::new(RefCell::new(Vec::new()));
        let stack =
            LinkStack::new(&Config::default(), &mut scheduler, RecordingDriver { frames: frames.clone() })
                .unwrap();

        let status = Rc::new(RefCell::new(None));
        let sink = status.clone();
        stack.send(
            SendRequest::new(NodeId(2), PacketBuffer::from_slice(b"ping"))
                .with_completion(move |confirmation| *sink.borrow_mut() = Some(confirmation.status())),
        );
        assert_eq!(stack.mac_state(), MacState::Transmitting);

        let frame = frames.borrow()[0].clone();
        assert_eq!(&frame[..5], &[0x41, b'p', b'i', b'n', b'g']);
        assert_eq!(crc16(&frame[..5]).to_be_bytes(), [frame[5], frame[6]]);

        stack.radio_events().tx_end(TxResult::Success, MacTxInfo::default());
        scheduler.run_pending();
        assert_eq!(*status.borrow(), Some(SendStatus::Success));
        assert_eq!(stack.mac_state(), MacState::Idle);

        let stats = stack.statistics();
        assert_eq!(stats.lffr.datagrams_sent, 1);
        assert_eq!(stats.crc.frames_protected, 1);
        assert_eq!(stats.mac.acked, 1);
    }
}
