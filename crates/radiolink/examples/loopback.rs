//! Two nodes on a simulated radio that loses every fifth frame.
//!
//! Run:
//! - cargo run -p radiolink --example loopback
//! - RUST_LOG=radiolink_layers=debug cargo run -p radiolink --example loopback -- 900

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    env,
    rc::Rc,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use radiolink::prelude::*;
use radiolink::{MacTxInfo, RxInfo};

struct Medium {
    nodes: RefCell<HashMap<NodeId, RadioEvents>>,
    in_air: RefCell<VecDeque<(NodeId, NodeId, Vec<u8>)>>,
    frames: Cell<u64>,
}

impl Medium {
    fn propagate(&self) -> bool {
        let mut moved = false;
        while let Some((source, destination, frame)) = self.in_air.borrow_mut().pop_front() {
            moved = true;
            let count = self.frames.get() + 1;
            self.frames.set(count);

            let nodes = self.nodes.borrow();
            let lost = count % 5 == 0;
            let result = match nodes.get(&destination) {
                Some(receiver) if !lost => {
                    receiver.rx_end(PacketBuffer::from(frame), source, destination, RxInfo { rssi: -60, lqi: 230 });
                    TxResult::Success
                }
                _ => {
                    println!("[medium] frame {} from {} lost", count, source);
                    TxResult::NoAck
                }
            };
            if let Some(sender) = nodes.get(&source) {
                sender.tx_end(result, MacTxInfo { destination, ..Default::default() });
            }
        }
        moved
    }
}

struct SimRadio {
    address: NodeId,
    medium: Rc<Medium>,
}

impl RadioDriver for SimRadio {
    fn start_transmit(&mut self, buffer: PacketBuffer, destination: NodeId, _: TxFlags, _: u32) -> bool {
        self.medium.in_air.borrow_mut().push_back((self.address, destination, buffer.into_vec()));
        true
    }

    fn set_promiscuous_mode(&mut self, _: bool) {}
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Args: [datagram_size]
    let size: usize = env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(600);

    let medium = Rc::new(Medium {
        nodes: RefCell::new(HashMap::new()),
        in_air: RefCell::new(VecDeque::new()),
        frames: Cell::new(0),
    });
    let mut scheduler = Scheduler::new(Arc::new(SystemClock));

    let mut stacks = Vec::new();
    for address in [NodeId(1), NodeId(2)] {
        let config = Config { local_address: address, ..Config::default() };
        let radio = SimRadio { address, medium: medium.clone() };
        let stack = LinkStack::new(&config, &mut scheduler, radio)?;
        medium.nodes.borrow_mut().insert(address, stack.radio_events());
        stack.connect_upper(&InputGate::new(move |datagram: ReceiveIndication| {
            println!("[{}] received {} bytes from {}", address, datagram.buffer.len(), datagram.source);
        }));
        stacks.push(stack);
    }

    let done = Rc::new(Cell::new(false));
    let finished = done.clone();
    let payload: Vec<u8> = (0..size).map(|i| i as u8).collect();
    stacks[0].send(SendRequest::new(NodeId(2), PacketBuffer::from(payload)).with_completion(
        move |confirmation: SendConfirmation| {
            let info = confirmation.metadata.get::<FragmentTxInfo>();
            println!("[0x0001] send finished: {} {:?}", confirmation.status(), info);
            finished.set(true);
        },
    ));

    let started = Instant::now();
    while !done.get() && started.elapsed() < Duration::from_secs(30) {
        scheduler.run_pending();
        if medium.propagate() {
            continue;
        }
        let idle = scheduler
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_millis(10));
        thread::sleep(idle.min(Duration::from_millis(10)));
    }

    for (index, stack) in stacks.iter().enumerate() {
        println!("node {}: {:?}", index + 1, stack.statistics());
    }
    Ok(())
}
