use std::sync::{Mutex, PoisonError};

use flume::{Receiver, Sender, TrySendError};

/// Signals that new data arrived in one of the accumulation buffers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DataEvent {
    /// A Sensor-Data-Output message advanced the 3D frame counter.
    Frame3d { frame_counter: u32 },

    /// A data message advanced the 2D message counter.
    Message2d { msg_counter: u32 },
}

/// A simple event emitter sending a single event to multiple MPSC channels.
#[derive(Debug)]
pub struct EventEmitter<T: Copy> {
    senders: Mutex<Vec<Sender<T>>>,
}

impl<T: Copy> Default for EventEmitter<T> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Copy> EventEmitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new receiver and adds the corresponding sender to the sender
    /// list.
    pub fn create_receiver(&self) -> Receiver<T> {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let (tx, rx) = flume::unbounded();
        senders.push(tx);
        rx
    }

    /// Creates a receiver holding at most one undelivered event.
    ///
    /// Events emitted while it is full are dropped for this receiver only, so
    /// it signals that something happened without ever growing.
    pub fn create_wakeup(&self) -> Receiver<T> {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let (tx, rx) = flume::bounded(1);
        senders.push(tx);
        rx
    }

    /// Emits an event to all senders. Senders whose receivers were dropped are
    /// removed from the list.
    pub fn emit(&self, event: T) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|sender| {
            !matches!(sender.try_send(event), Err(TrySendError::Disconnected(_)))
        });
    }

    /// The number of live receivers, as of the last emitted event.
    pub fn receiver_count(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_receivers_are_pruned() {
        let emitter = EventEmitter::new();
        let kept = emitter.create_receiver();
        let dropped = emitter.create_receiver();
        drop(dropped);

        emitter.emit(DataEvent::Frame3d { frame_counter: 4 });
        assert_eq!(emitter.receiver_count(), 1);
        assert_eq!(kept.try_recv(), Ok(DataEvent::Frame3d { frame_counter: 4 }));
    }

    #[test]
    fn wakeups_hold_a_single_event() {
        let emitter = EventEmitter::new();
        let wakeup = emitter.create_wakeup();
        let listener = emitter.create_receiver();

        for frame_counter in 1..=10 {
            emitter.emit(DataEvent::Frame3d { frame_counter });
        }

        assert_eq!(emitter.receiver_count(), 2);
        assert_eq!(wakeup.len(), 1);
        assert_eq!(wakeup.try_recv(), Ok(DataEvent::Frame3d { frame_counter: 1 }));
        assert_eq!(listener.len(), 10);
    }
}
