//! Type-keyed metadata attached to requests, indications and confirmations.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

/// Holds at most one value per type.
///
/// Layers use it to pass side information along with a message without widening the
/// message type, e.g. transmit statistics on a confirmation or link quality on an
/// indication.
#[derive(Default)]
pub struct Metadata {
    entries: HashMap<TypeId, Box<dyn Any>>,
}

impl Metadata {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous value of the same type if there was one.
    pub fn insert<T: Any>(&mut self, value: T) -> Option<T> {
        self.entries
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    /// Returns the value of type `T`, if present.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.entries.get(&TypeId::of::<T>()).and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns the value of type `T` mutably, if present.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.entries.get_mut(&TypeId::of::<T>()).and_then(|value| value.downcast_mut::<T>())
    }

    /// Removes and returns the value of type `T`, if present.
    pub fn remove<T: Any>(&mut self) -> Option<T> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Returns true if a value of type `T` is present.
    pub fn contains<T: Any>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata").field("entries", &self.entries.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Retries(u8);

    #[derive(Debug, PartialEq)]
    struct Rssi(i8);

    #[test]
    fn test_one_value_per_type() {
        let mut metadata = Metadata::new();
        assert_eq!(metadata.insert(Retries(1)), None);
        assert_eq!(metadata.insert(Rssi(-70)), None);
        assert_eq!(metadata.insert(Retries(2)), Some(Retries(1)));

        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata.get::<Retries>(), Some(&Retries(2)));
        assert_eq!(metadata.get::<Rssi>(), Some(&Rssi(-70)));
    }

    #[test]
    fn test_remove_and_mutate() {
        let mut metadata = Metadata::new();
        metadata.insert(Retries(0));
        if let Some(retries) = metadata.get_mut::<Retries>() {
            retries.0 += 3;
        }
        assert_eq!(metadata.remove::<Retries>(), Some(Retries(3)));
        assert!(!metadata.contains::<Retries>());
        assert!(metadata.is_empty());
    }
}
