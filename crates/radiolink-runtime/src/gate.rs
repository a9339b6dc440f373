//! Typed unidirectional connectors between components.

use std::{cell::OnceCell, fmt, rc::Rc};

/// Receiving end of a connection: a handler invoked for every message.
pub struct InputGate<T> {
    handler: Rc<dyn Fn(T)>,
}

impl<T> Clone for InputGate<T> {
    fn clone(&self) -> Self {
        Self { handler: self.handler.clone() }
    }
}

impl<T> InputGate<T> {
    /// Creates a gate around `handler`.
    pub fn new(handler: impl Fn(T) + 'static) -> Self {
        Self { handler: Rc::new(handler) }
    }

    /// Invokes the handler with `message`.
    pub fn deliver(&self, message: T) {
        (self.handler)(message)
    }
}

impl<T> fmt::Debug for InputGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InputGate")
    }
}

/// Sending end of a connection, bound once to exactly one [`InputGate`].
pub struct OutputGate<T> {
    name: &'static str,
    target: OnceCell<InputGate<T>>,
}

impl<T> OutputGate<T> {
    /// Creates an unbound gate.
    pub fn new(name: &'static str) -> Self {
        Self { name, target: OnceCell::new() }
    }

    /// Binds this gate to `input`. Binding twice is a programming error.
    pub fn connect(&self, input: &InputGate<T>) {
        assert!(self.target.set(input.clone()).is_ok(), "gate '{}' connected twice", self.name);
    }

    /// Returns true once bound.
    pub fn is_connected(&self) -> bool {
        self.target.get().is_some()
    }

    /// Hands `message` to the bound input, synchronously.
    pub fn send(&self, message: T) {
        match self.target.get() {
            Some(target) => target.deliver(message),
            None => panic!("gate '{}' used before being connected", self.name),
        }
    }
}

impl<T> fmt::Debug for OutputGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputGate")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}
