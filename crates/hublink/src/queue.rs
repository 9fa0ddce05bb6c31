//! FIFO message queues.
//!
//! Each client owns one outgoing and one incoming [`MessageQueue`]. Every
//! queue carries its own mutex; enqueue and dequeue never touch any other
//! lock domain, and neither ever blocks on I/O.
//!
//! Ordering invariant: dequeue order equals enqueue order. Messages are
//! removed only by the owning client's drain path
//! ([`crate::client::Client::flush_ready`] for outgoing,
//! [`crate::service::ServiceHandle::process_incoming`] for incoming), so
//! replies and signals from one peer observe call ordering.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::message::Message;

/// Ordered, unbounded queue of framed messages.
///
/// Bounded only by available memory; backpressure belongs to higher-level
/// flow control, not this layer.
#[derive(Debug, Default)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<Message>>,
}

impl MessageQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the tail. Never blocks, never drops.
    pub fn enqueue(&self, message: Message) {
        self.lock().push_back(message);
    }

    /// Remove and return the head, or `None` when empty.
    pub fn dequeue(&self) -> Option<Message> {
        self.lock().pop_front()
    }

    /// Serial number of the head message without removing it.
    pub fn peek_serial(&self) -> Option<u64> {
        self.lock().front().map(Message::serial)
    }

    /// Returns `true` when no messages are queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Message>> {
        // Poisoning means a panic mid-push/pop on a non-allocating path;
        // that is a programming-contract violation, fail fast.
        self.inner.lock().expect("message queue mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;

    fn numbered(serial: u64) -> Message {
        Message::call(serial, 0, "/", "m", Bytes::new())
    }

    #[test]
    fn test_fifo_order() {
        let queue = MessageQueue::new();
        for serial in 1..=5 {
            queue.enqueue(numbered(serial));
        }
        for serial in 1..=5 {
            assert_eq!(queue.dequeue().unwrap().serial(), serial);
        }
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_empty_queue_behavior() {
        let queue = MessageQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.peek_serial(), None);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let queue = MessageQueue::new();
        queue.enqueue(numbered(7));
        assert_eq!(queue.peek_serial(), Some(7));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue().unwrap().serial(), 7);
    }

    proptest! {
        /// Any interleaving of enqueues and dequeues matches a VecDeque
        /// model: strict FIFO, nothing reordered, nothing dropped.
        #[test]
        fn prop_queue_matches_fifo_model(ops in prop::collection::vec(prop::option::of(1u64..=1000), 0..200)) {
            let queue = MessageQueue::new();
            let mut model: VecDeque<u64> = VecDeque::new();

            for op in ops {
                match op {
                    Some(serial) => {
                        queue.enqueue(numbered(serial));
                        model.push_back(serial);
                    }
                    None => {
                        prop_assert_eq!(
                            queue.dequeue().map(|m| m.serial()),
                            model.pop_front()
                        );
                    }
                }
                prop_assert_eq!(queue.len(), model.len());
            }

            while let Some(expected) = model.pop_front() {
                prop_assert_eq!(queue.dequeue().unwrap().serial(), expected);
            }
            prop_assert!(queue.is_empty());
        }
    }
}
