//! The three layers wired by hand over a loopback radio.

use std::{cell::RefCell, collections::VecDeque, rc::Rc, sync::Arc};

use radiolink_core::{
    driver::{MacTxInfo, RadioDriver, RxInfo, TxFlags, TxResult},
    Config, NodeId, PacketBuffer, ReceiveIndication, SendRequest, SendStatus,
};
use radiolink_layers::{
    CrcLayer, CsmaMac, FragmentTxInfo, Lffr, MacState, RadioArbiter, RadioEvents,
};
use radiolink_runtime::{connect, InputGate, ManualClock, Scheduler, Stage};

const SELF: NodeId = NodeId(0x0001);

/// Queues frames; the test decides when they come back.
struct LoopbackRadio {
    accept: Rc<RefCell<bool>>,
    frames: Rc<RefCell<VecDeque<(Vec<u8>, NodeId)>>>,
}

impl RadioDriver for LoopbackRadio {
    fn start_transmit(&mut self, buffer: PacketBuffer, destination: NodeId, _: TxFlags, _: u32) -> bool {
        if !*self.accept.borrow() {
            return false;
        }
        self.frames.borrow_mut().push_back((buffer.into_vec(), destination));
        true
    }

    fn set_promiscuous_mode(&mut self, _: bool) {}
}

struct Chain {
    scheduler: Scheduler,
    lffr: Stage<Lffr>,
    crc: Stage<CrcLayer>,
    mac: Stage<CsmaMac>,
    events: RadioEvents,
    accept: Rc<RefCell<bool>>,
    frames: Rc<RefCell<VecDeque<(Vec<u8>, NodeId)>>>,
    received: Rc<RefCell<Vec<ReceiveIndication>>>,
}

impl Chain {
    fn new(config: Config) -> Self {
        let mut scheduler = Scheduler::new(Arc::new(ManualClock::new()));
        let accept = Rc::new(RefCell::new(true));
        let frames = Rc::new(RefCell::new(VecDeque::new()));
        let driver: Box<dyn RadioDriver> =
            Box::new(LoopbackRadio { accept: accept.clone(), frames: frames.clone() });
        let arbiter = RadioArbiter::new("radio", driver);
        arbiter.attach(&mut scheduler);

        let (lffr, lffr_hooks) = Lffr::new(&config, &mut scheduler).unwrap();
        let (mac, events, mac_hooks) = CsmaMac::new(arbiter, &mut scheduler, config.rx_queue_capacity);
        let lffr = Stage::new("lffr", lffr);
        let crc = Stage::new("crc", CrcLayer::new());
        let mac = Stage::new("mac", mac);
        connect(&lffr, &crc);
        connect(&crc, &mac);
        lffr_hooks.bind(&mut scheduler, &lffr);
        mac_hooks.bind(&mut scheduler, &mac);

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        lffr.upper().connect(&InputGate::new(move |indication| sink.borrow_mut().push(indication)));
        Self { scheduler, lffr, crc, mac, events, accept, frames, received }
    }

    /// Loops every frame back to this node until the radio falls silent.
    fn run(&self) {
        loop {
            self.scheduler.run_pending();
            let Some((frame, destination)) = self.frames.borrow_mut().pop_front() else {
                return;
            };
            self.events.rx_end(PacketBuffer::from(frame), SELF, destination, RxInfo::default());
            self.events.tx_end(TxResult::Success, MacTxInfo { destination, ..Default::default() });
        }
    }

    fn send(&self, len: usize) -> Rc<RefCell<Vec<(SendStatus, Option<FragmentTxInfo>)>>> {
        let outcomes = Rc::new(RefCell::new(Vec::new()));
        let sink = outcomes.clone();
        let payload: Vec<u8> = (0..len).map(|i| (i * 3) as u8).collect();
        self.lffr.request_input().deliver(
            SendRequest::new(SELF, PacketBuffer::from(payload)).with_completion(move |confirmation| {
                let info = confirmation.metadata.get::<FragmentTxInfo>().copied();
                sink.borrow_mut().push((confirmation.status(), info));
            }),
        );
        outcomes
    }
}

#[test]
fn test_fragmented_datagram_loops_back() {
    let chain = Chain::new(Config::default());
    let outcomes = chain.send(500);
    chain.run();

    let expected: Vec<u8> = (0..500).map(|i| (i * 3) as u8).collect();
    assert_eq!(chain.received.borrow().len(), 1);
    assert_eq!(chain.received.borrow()[0].buffer.as_slice(), &expected[..]);

    let outcomes = outcomes.borrow();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, SendStatus::Success);
    assert_eq!(outcomes[0].1.map(|info| info.fragments), Some(6));

    // six fragments and one ack, each verified on the way back up
    assert_eq!(chain.crc.component().statistics().frames_verified, 7);
    assert_eq!(chain.mac.component().statistics().incoming, 7);
}

#[test]
fn test_driver_rejection_fails_datagram_once() {
    let config = Config { use_selective_ack: false, ..Default::default() };
    let chain = Chain::new(config);
    *chain.accept.borrow_mut() = false;

    let outcomes = chain.send(40);
    chain.run();

    assert_eq!(outcomes.borrow().iter().map(|(status, _)| *status).collect::<Vec<_>>(), vec![SendStatus::FailUnknown]);
    assert_eq!(chain.mac.component().state(), MacState::Idle);
    assert_eq!(chain.mac.component().statistics().driver_rejections, 1);

    *chain.accept.borrow_mut() = true;
    let retry = chain.send(40);
    chain.run();
    assert_eq!(retry.borrow()[0].0, SendStatus::Success);
    assert_eq!(chain.received.borrow().len(), 1);
}

#[test]
fn test_fragment_rejection_fails_session_without_acks() {
    let config = Config { use_selective_ack: false, ..Default::default() };
    let chain = Chain::new(config);
    *chain.accept.borrow_mut() = false;

    let outcomes = chain.send(300);
    chain.run();

    assert_eq!(outcomes.borrow()[0].0, SendStatus::FailUnknown);
    assert_eq!(chain.lffr.component().active_sessions(), 0);
    assert_eq!(chain.lffr.component().queued_frames(), 0);
}
