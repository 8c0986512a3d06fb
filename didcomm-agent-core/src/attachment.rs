//! Typed out-of-band attachments.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A named key that fixes the type of the value stored under it.
pub struct AttachmentKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttachmentKey<T> {
    /// Creates a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttachmentKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttachmentKey<T> {}

impl<T> fmt::Debug for AttachmentKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttachmentKey({})", self.name)
    }
}

/// A value shared between a wallet and the exchanges that reference it.
#[derive(Debug, Default)]
pub struct Shared<T>(Arc<RwLock<T>>);

impl<T> Shared<T> {
    /// Wraps `value`.
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Locks the value for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the value for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles refer to the same value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Shared<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// A heterogeneous map of values addressed by [`AttachmentKey`]s.
#[derive(Default)]
pub struct Attachments {
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl Attachments {
    /// Stores `value` under `key`, returning the previous value.
    pub fn put<T: Any + Send + Sync>(&mut self, key: AttachmentKey<T>, value: T) -> Option<T> {
        self.values
            .insert(key.name, Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Borrows the value under `key`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: AttachmentKey<T>) -> Option<&T> {
        self.values.get(key.name)?.downcast_ref::<T>()
    }

    /// Removes the value under `key`.
    pub fn remove<T: Any + Send + Sync>(&mut self, key: AttachmentKey<T>) -> Option<T> {
        self.values
            .remove(key.name)
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Whether a value is stored under `key`.
    #[must_use]
    pub fn contains<T>(&self, key: AttachmentKey<T>) -> bool {
        self.values.contains_key(key.name)
    }
}

impl fmt::Debug for Attachments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: AttachmentKey<String> = AttachmentKey::new("Name");
    const COUNT: AttachmentKey<u32> = AttachmentKey::new("Count");

    #[test]
    fn test_put_get_remove() {
        let mut attachments = Attachments::default();
        assert!(attachments.put(NAME, "alice".to_string()).is_none());
        attachments.put(COUNT, 3);

        assert_eq!(attachments.get(NAME).map(String::as_str), Some("alice"));
        assert_eq!(attachments.get(COUNT), Some(&3));
        assert_eq!(attachments.put(COUNT, 4), Some(3));

        assert_eq!(attachments.remove(NAME), Some("alice".to_string()));
        assert!(!attachments.contains(NAME));
        assert!(attachments.contains(COUNT));
    }
}
