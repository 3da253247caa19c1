// src/protocol/inbox.rs
//! Bus event inbox
//!
//! The slave interrupt does nothing but push the raw condition into a
//! bounded lock-free queue. [`BusTask`] drains it, runs the protocol engine
//! and hands each reaction to the peripheral through a [`SlaveResponder`].
//! While a reaction is outstanding the peripheral holds the clock low, so the
//! host simply waits for the task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use tracing::warn;

use crate::config::constants::protocol::MIN_INBOX_CAPACITY;
use crate::hal::{BusEvent, SlaveResponder};
use crate::protocol::engine::SlaveProtocolEngine;

#[derive(Debug)]
pub struct BusInbox {
    queue: ArrayQueue<BusEvent>,
    dropped: AtomicUsize,
}

impl BusInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(MIN_INBOX_CAPACITY)),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Interrupt side. Never blocks; a full inbox drops the event.
    pub fn push(&self, event: BusEvent) -> bool {
        if self.queue.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            true
        }
    }

    pub fn pop(&self) -> Option<BusEvent> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Single consumer of the inbox
pub struct BusTask {
    inbox: Arc<BusInbox>,
    engine: SlaveProtocolEngine,
    reported_drops: usize,
}

impl BusTask {
    pub fn new(inbox: Arc<BusInbox>, engine: SlaveProtocolEngine) -> Self {
        Self {
            inbox,
            engine,
            reported_drops: 0,
        }
    }

    pub fn engine(&self) -> &SlaveProtocolEngine {
        &self.engine
    }

    /// Process every queued event. Returns how many were handled.
    pub fn service<R: SlaveResponder>(&mut self, responder: &mut R) -> usize {
        let dropped = self.inbox.dropped();
        if dropped != self.reported_drops {
            warn!(lost = dropped - self.reported_drops, "bus inbox overflowed");
            self.reported_drops = dropped;
        }

        let mut handled = 0;
        while let Some(event) = self.inbox.pop() {
            let action = self.engine.handle(event);
            responder.respond(action);
            handled += 1;
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::store::SharedSampleStore;
    use crate::hal::{BusAction, Direction};
    use crate::protocol::dispatcher::CommandDispatcher;

    fn task(capacity: usize) -> (BusTask, Arc<BusInbox>, Arc<SharedSampleStore>) {
        let store = Arc::new(SharedSampleStore::default());
        let inbox = Arc::new(BusInbox::new(capacity));
        let engine = SlaveProtocolEngine::new(CommandDispatcher::new(store.clone()));
        (BusTask::new(inbox.clone(), engine), inbox, store)
    }

    #[test]
    fn test_capacity_has_a_floor() {
        assert_eq!(BusInbox::new(1).capacity(), MIN_INBOX_CAPACITY);
        assert_eq!(BusInbox::new(32).capacity(), 32);
    }

    #[test]
    fn test_full_inbox_drops() {
        let inbox = BusInbox::new(MIN_INBOX_CAPACITY);
        for _ in 0..MIN_INBOX_CAPACITY {
            assert!(inbox.push(BusEvent::Stop));
        }
        assert!(!inbox.push(BusEvent::Stop));
        assert_eq!(inbox.dropped(), 1);
    }

    #[test]
    fn test_service_drains_in_order() {
        let (mut task, inbox, store) = task(16);
        store.publish_emg([7, 9]);
        for event in [
            BusEvent::AddressMatch(Direction::HostWrite),
            BusEvent::ByteReceived(0x00),
            BusEvent::AddressMatch(Direction::HostRead),
            BusEvent::ByteRequested,
            BusEvent::ByteRequested,
            BusEvent::Stop,
        ] {
            inbox.push(event);
        }

        let mut actions = Vec::new();
        let handled = task.service(&mut |action: BusAction| actions.push(action));

        assert_eq!(handled, 6);
        assert!(inbox.is_empty());
        assert_eq!(
            actions,
            vec![
                BusAction::Ack,
                BusAction::Ack,
                BusAction::Ack,
                BusAction::Transmit { byte: 7, last: false },
                BusAction::Transmit { byte: 9, last: true },
                BusAction::Idle,
            ]
        );
    }
}
