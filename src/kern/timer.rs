//! Event Timer Tree - timeouts for blocked threads
//!
//! Events are ordered by absolute deadline, ties broken by insertion order.
//! Every block takes an [`EventHandle`] from here, even an untimed one, so
//! the handle doubles as the identity of the block when the timeout path and
//! the rendezvous path race to retire it.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::types::{Nanos, ThreadId};

// ============================================================================
// Event Handles
// ============================================================================

/// Identity of one timer event (or of one untimed block)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHandle(u64);

/// Tree key: deadline first, then insertion sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EventKey {
    deadline: Nanos,
    seq: u64,
}

// ============================================================================
// Event Timer Tree
// ============================================================================

/// Ordered set of pending timeout events
#[derive(Debug, Default)]
pub struct EventTimerTree {
    /// Pending events in expiry order
    events: BTreeMap<EventKey, ThreadId>,
    /// Handle to key, for cancellation
    index: BTreeMap<EventHandle, EventKey>,
    /// Next sequence / handle value
    next_seq: u64,
}

impl EventTimerTree {
    pub fn new() -> Self {
        Self {
            events: BTreeMap::new(),
            index: BTreeMap::new(),
            next_seq: 1,
        }
    }

    fn next(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Allocate a handle for a block that has no deadline
    pub fn reserve_handle(&mut self) -> EventHandle {
        EventHandle(self.next())
    }

    /// Arm an event for `thread` at absolute time `deadline`
    pub fn kevent_insert(&mut self, deadline: Nanos, thread: ThreadId) -> EventHandle {
        let seq = self.next();
        let key = EventKey { deadline, seq };
        let handle = EventHandle(seq);
        self.events.insert(key, thread);
        self.index.insert(handle, key);
        handle
    }

    /// Disarm an event. Returns false if it already fired or never existed.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        match self.index.remove(&handle) {
            Some(key) => self.events.remove(&key).is_some(),
            None => false,
        }
    }

    /// Remove and return every event with `deadline <= now`, earliest first
    pub fn expire(&mut self, now: Nanos) -> Vec<(EventHandle, ThreadId)> {
        let mut fired = Vec::new();
        while let Some((&key, _)) = self.events.first_key_value() {
            if key.deadline > now {
                break;
            }
            if let Some(thread) = self.events.remove(&key) {
                let handle = EventHandle(key.seq);
                self.index.remove(&handle);
                fired.push((handle, thread));
            }
        }
        fired
    }

    /// Earliest pending deadline, for programming the hardware timer
    pub fn next_deadline(&self) -> Option<Nanos> {
        self.events.first_key_value().map(|(key, _)| key.deadline)
    }

    pub fn is_armed(&self, handle: EventHandle) -> bool {
        self.index.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
