//! Integrity layer: CRC-16 trailer on every frame.

use radiolink_core::{error::DecodingErrorKind, ReceiveIndication, SendRequest};
use radiolink_protocol::checksum::{append_checksum, strip_checksum};
use radiolink_runtime::{Actions, Component};
use tracing::debug;

use crate::statistics::CrcStatistics;

/// Appends a checksum to outbound frames and verifies it on inbound ones.
#[derive(Debug, Default)]
pub struct CrcLayer {
    stats: CrcStatistics,
}

impl CrcLayer {
    /// Creates the layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters collected so far.
    pub fn statistics(&self) -> &CrcStatistics {
        &self.stats
    }
}

impl Component for CrcLayer {
    fn handle_request(&mut self, mut request: SendRequest, actions: &mut Actions) {
        append_checksum(&mut request.buffer);
        self.stats.frames_protected += 1;
        actions.down(request);
    }

    fn handle_indication(&mut self, mut indication: ReceiveIndication, actions: &mut Actions) {
        match strip_checksum(&mut indication.buffer) {
            Ok(()) => {
                self.stats.frames_verified += 1;
                actions.up(indication);
            }
            Err(DecodingErrorKind::Truncated { available, .. }) => {
                self.stats.dropped_too_short += 1;
                debug!("Dropping {} byte frame from {}: too short for CRC", available, indication.source);
            }
            Err(err) => {
                self.stats.dropped_mismatch += 1;
                debug!("Dropping frame from {}: {}", indication.source, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use radiolink_core::{NodeId, PacketBuffer};
    use radiolink_runtime::{InputGate, Stage};

    use super::*;

    fn stage_with_sinks() -> (Stage<CrcLayer>, Rc<RefCell<Vec<Vec<u8>>>>, Rc<RefCell<Vec<Vec<u8>>>>) {
        let stage = Stage::new("crc", CrcLayer::new());
        let down = Rc::new(RefCell::new(Vec::new()));
        let up = Rc::new(RefCell::new(Vec::new()));
        let down_sink = down.clone();
        let up_sink = up.clone();
        stage.lower().connect(&InputGate::new(move |request: SendRequest| {
            down_sink.borrow_mut().push(request.buffer.into_vec())
        }));
        stage.upper().connect(&InputGate::new(move |indication: ReceiveIndication| {
            up_sink.borrow_mut().push(indication.buffer.into_vec())
        }));
        (stage, down, up)
    }

    fn indication(bytes: Vec<u8>) -> ReceiveIndication {
        ReceiveIndication::new(NodeId(7), NodeId(1), PacketBuffer::from(bytes))
    }

    #[test]
    fn test_outbound_frame_gets_trailer_and_verifies_inbound() {
        let (stage, down, up) = stage_with_sinks();
        stage
            .request_input()
            .deliver(SendRequest::new(NodeId(7), PacketBuffer::from_slice(b"hello")));

        let frame = down.borrow_mut().remove(0);
        assert_eq!(frame.len(), 7);

        stage.indication_input().deliver(indication(frame));
        assert_eq!(*up.borrow(), vec![b"hello".to_vec()]);
        assert_eq!(stage.component().statistics().frames_verified, 1);
    }

    #[test]
    fn test_single_byte_frame_is_dropped() {
        let (stage, _down, up) = stage_with_sinks();
        stage.indication_input().deliver(indication(vec![0x41]));

        assert!(up.borrow().is_empty());
        assert_eq!(stage.component().statistics().dropped_too_short, 1);
    }

    #[test]
    fn test_corrupted_frame_is_dropped() {
        let (stage, down, up) = stage_with_sinks();
        stage
            .request_input()
            .deliver(SendRequest::new(NodeId(7), PacketBuffer::from_slice(b"hello")));
        let mut frame = down.borrow_mut().remove(0);
        frame[1] ^= 0x40;

        stage.indication_input().deliver(indication(frame));
        assert!(up.borrow().is_empty());
        assert_eq!(stage.component().statistics().dropped_mismatch, 1);
        assert_eq!(stage.component().statistics().dropped(), 1);
    }
}
