//! Correlation of incoming responses with waiting callers.
//!
//! A caller registers what it is waiting for in a [`Slot`] and keeps the
//! receiving end of a channel. The message handler checks each response
//! against the registration and delivers matching values through the channel.
//! The registration is cleared when the returned [`SlotGuard`] drops, no
//! matter how the wait ended.

use std::sync::{Mutex, PoisonError};

use flume::{Receiver, Sender};

/// A registered expectation.
struct Registration<K, V> {
    /// Identifies the expected response.
    key: K,

    /// Whether the registration stays after a delivery.
    persistent: bool,

    /// Delivers values to the waiting caller.
    sender: Sender<V>,
}

/// Holds at most one pending request of a kind.
pub struct Slot<K, V> {
    registration: Mutex<Option<Registration<K, V>>>,
}

impl<K, V> Default for Slot<K, V> {
    fn default() -> Self {
        Self {
            registration: Mutex::new(None),
        }
    }
}

impl<K, V> Slot<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a one-shot request. The first matching response clears it.
    ///
    /// Replaces a previous registration, whose receiver then disconnects.
    pub fn register(&self, key: K) -> (SlotGuard<'_, K, V>, Receiver<V>) {
        self.insert(key, false)
    }

    /// Registers a request that receives every matching response until the
    /// guard drops.
    pub fn watch(&self, key: K) -> (SlotGuard<'_, K, V>, Receiver<V>) {
        self.insert(key, true)
    }

    fn insert(&self, key: K, persistent: bool) -> (SlotGuard<'_, K, V>, Receiver<V>) {
        let (sender, receiver) = flume::unbounded();
        *self.lock() = Some(Registration {
            key,
            persistent,
            sender,
        });
        (SlotGuard { slot: self }, receiver)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Registration<K, V>>> {
        self.registration.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a request is registered.
    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Delivers a response if it satisfies the registration.
    ///
    /// `accept` inspects the registered key and returns the value to deliver,
    /// or `None` if the response is not the one waited for. Returns whether a
    /// value was delivered.
    pub fn fulfil(&self, accept: impl FnOnce(&K) -> Option<V>) -> bool {
        let mut guard = self.lock();
        let Some(registration) = guard.as_ref() else {
            return false;
        };
        let Some(value) = accept(&registration.key) else {
            return false;
        };

        // The caller may have given up already, which is not an error here.
        let _ = registration.sender.send(value);
        if !registration.persistent {
            *guard = None;
        }
        true
    }

    fn clear(&self) {
        *self.lock() = None;
    }
}

/// Clears a registration when dropped.
pub struct SlotGuard<'a, K, V> {
    slot: &'a Slot<K, V>,
}

impl<K, V> Drop for SlotGuard<'_, K, V> {
    fn drop(&mut self) {
        self.slot.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_response_is_delivered_once() {
        let slot = Slot::<u16, u32>::new();
        let (_guard, rx) = slot.register(0x85);

        assert!(!slot.fulfil(|key| (*key == 0x90).then_some(1)));
        assert!(slot.fulfil(|key| (*key == 0x85).then_some(2)));
        assert!(!slot.fulfil(|key| (*key == 0x85).then_some(3)));

        assert_eq!(rx.try_recv(), Ok(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn guard_clears_registration() {
        let slot = Slot::<u8, ()>::new();
        {
            let (_guard, _rx) = slot.register(1);
            assert!(slot.is_pending());
        }
        assert!(!slot.is_pending());
        assert!(!slot.fulfil(|_| Some(())));
    }

    #[test]
    fn watch_keeps_receiving() {
        let slot = Slot::<(), u8>::new();
        let (guard, rx) = slot.watch(());

        assert!(slot.fulfil(|_| Some(0xFF)));
        assert!(slot.fulfil(|_| Some(0)));
        assert_eq!(rx.drain().collect::<Vec<_>>(), [0xFF, 0]);

        drop(guard);
        assert!(!slot.is_pending());
    }

    #[test]
    fn abandoned_wait_does_not_block_handler() {
        let slot = Slot::<u8, u8>::new();
        let (_guard, rx) = slot.register(1);
        drop(rx);
        assert!(slot.fulfil(|_| Some(5)));
    }
}
