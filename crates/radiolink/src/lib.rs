#![warn(missing_docs)]

//! radiolink: a link-layer transport for constrained wireless nodes.
//!
//! This crate re-exports the types needed to run the stack:
//!
//! - Configuration (`Config`)
//! - Messages (`SendRequest`, `ReceiveIndication`, `SendConfirmation`, `SendStatus`)
//! - The radio driver interface (`RadioDriver`, `RadioEvents`)
//! - The event loop (`Scheduler`, clocks)
//! - The assembled stack (`LinkStack`)
//!
//! Example
//! ```ignore
//! use std::sync::Arc;
//! use radiolink::prelude::*;
//!
//! let mut scheduler = Scheduler::new(Arc::new(SystemClock));
//! let stack = LinkStack::new(&Config::default(), &mut scheduler, my_driver)?;
//! my_driver_events.install(stack.radio_events());
//!
//! stack.connect_upper(&InputGate::new(|datagram: ReceiveIndication| {
//!     println!("{} bytes from {}", datagram.buffer.len(), datagram.source);
//! }));
//! stack.send(
//!     SendRequest::new(NodeId(2), PacketBuffer::from(vec![0u8; 300]))
//!         .with_completion(|confirmation| println!("sent: {}", confirmation.status())),
//! );
//!
//! loop {
//!     scheduler.run_pending();
//!     // sleep until scheduler.next_deadline() or the next radio interrupt
//! }
//! ```

/// Stack assembly.
pub mod stack;

// Core types
pub use radiolink_core::{
    driver::{MacTxInfo, RadioDriver, RxInfo, TxFlags, TxResult},
    Config, ErrorKind, NodeId, PacketBuffer, ReceiveIndication, Result, SendConfirmation,
    SendRequest, SendStatus,
};
// Components and their counters
pub use radiolink_layers::{
    CrcStatistics, FragmentTxInfo, LffrStatistics, MacState, MacStatistics, RadioEvents,
};
// Event loop
pub use radiolink_runtime::{Clock, InputGate, ManualClock, Scheduler, SystemClock};
pub use stack::{LinkStack, StackStatistics};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Config, FragmentTxInfo, InputGate, LinkStack, NodeId, PacketBuffer, RadioDriver,
        RadioEvents, ReceiveIndication, Scheduler, SendConfirmation, SendRequest, SendStatus,
        SystemClock, TxFlags, TxResult,
    };
}
