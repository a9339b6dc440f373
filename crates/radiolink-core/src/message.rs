//! Messages exchanged between stack components.
//!
//! A [`SendRequest`] travels down the stack and is eventually turned into a
//! [`SendConfirmation`] delivered through its one-shot [`Completion`]. A
//! [`ReceiveIndication`] travels up. Both own their [`PacketBuffer`] and move from
//! component to component; nothing is shared.

use std::{any::Any, fmt};

use crate::{buffer::PacketBuffer, metadata::Metadata};

/// Link-layer node address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Address every node accepts.
    pub const BROADCAST: NodeId = NodeId(0xFFFF);

    /// Returns true for the broadcast address.
    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Outcome of a send request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SendStatus {
    /// Delivered (and acknowledged where acknowledgments were requested).
    Success,
    /// No acknowledgment arrived within the retry budget.
    NoAck,
    /// A bounded queue was full.
    QueueFull,
    /// The layer is busy with another transmission; retry later.
    Busy,
    /// Clear-channel assessment kept failing.
    ChannelAccessFailure,
    /// The destination address is not usable.
    InvalidAddress,
    /// The request cannot be carried as given (e.g. oversized datagram).
    InvalidParameter,
    /// The request timed out before it could be sent.
    Expired,
    /// The lower layer refused the request without a reason.
    FailUnknown,
    /// No route to the destination.
    NoRoute,
}

impl SendStatus {
    /// Returns true for [`SendStatus::Success`].
    pub fn is_success(self) -> bool {
        self == SendStatus::Success
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendStatus::Success => "success",
            SendStatus::NoAck => "no ack",
            SendStatus::QueueFull => "queue full",
            SendStatus::Busy => "busy",
            SendStatus::ChannelAccessFailure => "channel access failure",
            SendStatus::InvalidAddress => "invalid address",
            SendStatus::InvalidParameter => "invalid parameter",
            SendStatus::Expired => "expired",
            SendStatus::FailUnknown => "unknown failure",
            SendStatus::NoRoute => "no route",
        };
        f.write_str(name)
    }
}

/// Result of a send request, produced by a lower layer.
#[derive(Debug)]
pub struct SendConfirmation {
    status: SendStatus,
    /// Side information such as retry counts.
    pub metadata: Metadata,
}

impl SendConfirmation {
    /// Creates a confirmation without metadata.
    pub fn new(status: SendStatus) -> Self {
        Self { status, metadata: Metadata::new() }
    }

    /// Attaches a metadata value.
    pub fn with<T: Any>(mut self, value: T) -> Self {
        self.metadata.insert(value);
        self
    }

    /// The status code.
    pub fn status(&self) -> SendStatus {
        self.status
    }

    /// Returns true when the status is [`SendStatus::Success`].
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// One-shot completion handle stored in a [`SendRequest`].
///
/// Firing consumes the handle, so a request is confirmed at most once.
#[derive(Default)]
pub struct Completion {
    callback: Option<Box<dyn FnOnce(SendConfirmation)>>,
}

impl Completion {
    /// Wraps a callback.
    pub fn new(callback: impl FnOnce(SendConfirmation) + 'static) -> Self {
        Self { callback: Some(Box::new(callback)) }
    }

    /// A handle with no callback; firing it just drops the confirmation.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns true if a callback is attached.
    pub fn is_set(&self) -> bool {
        self.callback.is_some()
    }

    /// Delivers `confirmation` to the callback.
    pub fn fire(self, confirmation: SendConfirmation) {
        if let Some(callback) = self.callback {
            callback(confirmation);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("set", &self.is_set()).finish()
    }
}

/// Request to transmit a buffer to a node.
#[derive(Debug)]
pub struct SendRequest {
    /// Destination node.
    pub destination: NodeId,
    /// Payload, owned by the request.
    pub buffer: PacketBuffer,
    /// Opaque id chosen by the submitter.
    pub correlation: Option<u64>,
    /// Side information attached by the submitter or upper layers.
    pub metadata: Metadata,
    completion: Completion,
}

impl SendRequest {
    /// Creates a request without completion callback.
    pub fn new(destination: NodeId, buffer: PacketBuffer) -> Self {
        Self {
            destination,
            buffer,
            correlation: None,
            metadata: Metadata::new(),
            completion: Completion::none(),
        }
    }

    /// Sets the completion callback.
    pub fn with_completion(mut self, callback: impl FnOnce(SendConfirmation) + 'static) -> Self {
        self.completion = Completion::new(callback);
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation(mut self, correlation: u64) -> Self {
        self.correlation = Some(correlation);
        self
    }

    /// Attaches a metadata value.
    pub fn with_metadata<T: Any>(mut self, value: T) -> Self {
        self.metadata.insert(value);
        self
    }

    /// Detaches the completion handle, leaving an empty one behind.
    pub fn take_completion(&mut self) -> Completion {
        std::mem::take(&mut self.completion)
    }

    /// Replaces the completion handle.
    pub fn set_completion(&mut self, completion: Completion) {
        self.completion = completion;
    }

    /// Consumes the request, returning its completion handle.
    pub fn into_completion(self) -> Completion {
        self.completion
    }

    /// Consumes the request and fires its completion with `confirmation`.
    pub fn confirm(self, confirmation: SendConfirmation) {
        self.completion.fire(confirmation);
    }
}

/// A frame or datagram travelling up the stack.
#[derive(Debug)]
pub struct ReceiveIndication {
    /// Node that sent the frame.
    pub source: NodeId,
    /// Node the frame was addressed to.
    pub destination: NodeId,
    /// Payload, owned by the indication.
    pub buffer: PacketBuffer,
    /// Side information such as link quality.
    pub metadata: Metadata,
}

impl ReceiveIndication {
    /// Creates an indication without metadata.
    pub fn new(source: NodeId, destination: NodeId, buffer: PacketBuffer) -> Self {
        Self { source, destination, buffer, metadata: Metadata::new() }
    }

    /// Attaches a metadata value.
    pub fn with_metadata<T: Any>(mut self, value: T) -> Self {
        self.metadata.insert(value);
        self
    }
}

/// Identifies one fragmentation or reassembly session.
///
/// Two sessions sharing a tag are distinct when their peer pairs differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalDatagramId {
    /// Sender of the datagram.
    pub source: NodeId,
    /// Receiver of the datagram.
    pub destination: NodeId,
    /// Sender-chosen tag.
    pub tag: u16,
    /// Total datagram size in bytes.
    pub size: u16,
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Retries(u8);

    #[test]
    fn test_request_confirm_fires_once() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let request = SendRequest::new(NodeId(2), PacketBuffer::from_slice(b"hi"))
            .with_completion(move |confirmation| sink.borrow_mut().push(confirmation.status()));

        request.confirm(SendConfirmation::new(SendStatus::Busy));
        assert_eq!(*seen.borrow(), vec![SendStatus::Busy]);
    }

    #[test]
    fn test_take_completion_leaves_empty_handle() {
        let mut request =
            SendRequest::new(NodeId(2), PacketBuffer::new()).with_completion(|_| {});
        let completion = request.take_completion();
        assert!(completion.is_set());
        assert!(!request.into_completion().is_set());
    }

    #[test]
    fn test_confirmation_metadata() {
        let confirmation = SendConfirmation::new(SendStatus::Success).with(Retries(2));
        assert!(confirmation.is_success());
        assert_eq!(confirmation.metadata.get::<Retries>(), Some(&Retries(2)));
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(0x1A).to_string(), "0x001A");
        assert!(NodeId::BROADCAST.is_broadcast());
    }
}
