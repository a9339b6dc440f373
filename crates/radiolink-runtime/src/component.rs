//! Stack components and the stages hosting them.
//!
//! A [`Component`] never calls a gate directly. Its hooks record [`Action`]s, and the
//! [`Stage`] around it performs them once the component is no longer borrowed. A lower
//! layer may therefore confirm a request synchronously and the confirmation may reach
//! straight back into an upper layer without tripping over an active borrow.

use std::{
    cell::{Ref, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use radiolink_core::{Completion, ReceiveIndication, SendConfirmation, SendRequest};

use crate::gate::{InputGate, OutputGate};

/// Work a component asks its stage to perform.
#[derive(Debug)]
pub enum Action {
    /// Pass a request to the layer below.
    Down(SendRequest),
    /// Pass an indication to the layer above.
    Up(ReceiveIndication),
    /// Fire a completion handle.
    Complete(Completion, SendConfirmation),
}

/// Ordered list of actions produced by one hook invocation.
#[derive(Debug, Default)]
pub struct Actions {
    queue: Vec<Action>,
}

impl Actions {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a request for the layer below.
    pub fn down(&mut self, request: SendRequest) {
        self.queue.push(Action::Down(request));
    }

    /// Queues an indication for the layer above.
    pub fn up(&mut self, indication: ReceiveIndication) {
        self.queue.push(Action::Up(indication));
    }

    /// Consumes `request` and queues its confirmation.
    pub fn confirm(&mut self, request: SendRequest, confirmation: SendConfirmation) {
        self.queue.push(Action::Complete(request.into_completion(), confirmation));
    }

    /// Queues firing of a detached completion handle.
    pub fn complete(&mut self, completion: Completion, confirmation: SendConfirmation) {
        self.queue.push(Action::Complete(completion, confirmation));
    }

    /// Number of queued actions.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes and returns the queued actions.
    pub fn drain(&mut self) -> std::vec::Drain<'_, Action> {
        self.queue.drain(..)
    }
}

impl IntoIterator for Actions {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.queue.into_iter()
    }
}

/// A layer of the stack. Both hooks pass messages through unchanged by default.
pub trait Component {
    /// Handles a request coming from the layer above.
    fn handle_request(&mut self, request: SendRequest, actions: &mut Actions) {
        actions.down(request);
    }

    /// Handles an indication coming from the layer below.
    fn handle_indication(&mut self, indication: ReceiveIndication, actions: &mut Actions) {
        actions.up(indication);
    }
}

/// Pass-through component.
#[derive(Debug, Default)]
pub struct PassThrough;

impl Component for PassThrough {}

struct StageInner<C> {
    name: &'static str,
    component: RefCell<C>,
    lower: OutputGate<SendRequest>,
    upper: OutputGate<ReceiveIndication>,
}

/// Hosts a component between its two output gates.
pub struct Stage<C> {
    inner: Rc<StageInner<C>>,
}

impl<C> Clone for Stage<C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<C: Component + 'static> Stage<C> {
    /// Wraps `component`.
    pub fn new(name: &'static str, component: C) -> Self {
        Self {
            inner: Rc::new(StageInner {
                name,
                component: RefCell::new(component),
                lower: OutputGate::new(name),
                upper: OutputGate::new(name),
            }),
        }
    }

    /// Gate through which the layer above submits requests.
    pub fn request_input(&self) -> InputGate<SendRequest> {
        let weak = Rc::downgrade(&self.inner);
        InputGate::new(move |request| {
            Self::upgrade(&weak).with(|component, actions| component.handle_request(request, actions))
        })
    }

    /// Gate through which the layer below delivers indications.
    pub fn indication_input(&self) -> InputGate<ReceiveIndication> {
        let weak = Rc::downgrade(&self.inner);
        InputGate::new(move |indication| {
            Self::upgrade(&weak)
                .with(|component, actions| component.handle_indication(indication, actions))
        })
    }

    /// Output towards the layer below.
    pub fn lower(&self) -> &OutputGate<SendRequest> {
        &self.inner.lower
    }

    /// Output towards the layer above.
    pub fn upper(&self) -> &OutputGate<ReceiveIndication> {
        &self.inner.upper
    }

    /// Runs loop-context work on the component, then performs the actions it queued.
    pub fn with<T>(&self, f: impl FnOnce(&mut C, &mut Actions) -> T) -> T {
        let mut actions = Actions::new();
        let result = {
            let mut component = self.inner.component.borrow_mut();
            f(&mut component, &mut actions)
        };
        self.perform(actions);
        result
    }

    /// Borrows the component for inspection.
    pub fn component(&self) -> Ref<'_, C> {
        self.inner.component.borrow()
    }

    fn perform(&self, actions: Actions) {
        for action in actions {
            match action {
                Action::Down(request) => self.inner.lower.send(request),
                Action::Up(indication) => self.inner.upper.send(indication),
                Action::Complete(completion, confirmation) => completion.fire(confirmation),
            }
        }
    }

    fn upgrade(weak: &Weak<StageInner<C>>) -> Stage<C> {
        match weak.upgrade() {
            Some(inner) => Stage { inner },
            None => panic!("message delivered to a dropped stage"),
        }
    }
}

impl<C> fmt::Debug for Stage<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.inner.name).finish()
    }
}

/// Connects `upper` on top of `lower` in both directions.
pub fn connect<U, L>(upper: &Stage<U>, lower: &Stage<L>)
where
    U: Component + 'static,
    L: Component + 'static,
{
    upper.lower().connect(&lower.request_input());
    lower.upper().connect(&upper.indication_input());
}
