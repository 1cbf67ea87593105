//! Wait queues - priority ordered lists of blocked threads
//!
//! Entries are thread ids; the per-thread state (block info, pending send
//! or connect request) lives in the thread table. Higher priority threads
//! come out first, FIFO within a priority.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::types::{Priority, ThreadId};

/// A thread parked on a wait queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub thread: ThreadId,
    pub priority: Priority,
}

/// Priority-ordered FIFO of waiting threads
#[derive(Debug, Default, Clone)]
pub struct WaitQueue {
    waiters: VecDeque<Waiter>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
        }
    }

    /// Insert behind every waiter of equal or higher priority
    pub fn push(&mut self, thread: ThreadId, priority: Priority) {
        let pos = self
            .waiters
            .iter()
            .position(|w| w.priority < priority)
            .unwrap_or(self.waiters.len());
        self.waiters.insert(pos, Waiter { thread, priority });
    }

    /// Take the first waiter
    pub fn pop(&mut self) -> Option<ThreadId> {
        self.waiters.pop_front().map(|w| w.thread)
    }

    /// Take the first waiter accepted by `pred`
    pub fn pop_where(&mut self, mut pred: impl FnMut(ThreadId) -> bool) -> Option<ThreadId> {
        let pos = self.waiters.iter().position(|w| pred(w.thread))?;
        self.waiters.remove(pos).map(|w| w.thread)
    }

    /// Remove a specific thread; true if it was queued
    pub fn remove(&mut self, thread: ThreadId) -> bool {
        match self.waiters.iter().position(|w| w.thread == thread) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove every waiter accepted by `pred`, in queue order
    pub fn drain_where(&mut self, mut pred: impl FnMut(ThreadId) -> bool) -> Vec<ThreadId> {
        let mut taken = Vec::new();
        self.waiters.retain(|w| {
            if pred(w.thread) {
                taken.push(w.thread);
                false
            } else {
                true
            }
        });
        taken
    }

    /// Remove every waiter, in queue order
    pub fn drain(&mut self) -> Vec<ThreadId> {
        self.waiters.drain(..).map(|w| w.thread).collect()
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.waiters.iter().any(|w| w.thread == thread)
    }

    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.waiters.iter().map(|w| w.thread)
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = WaitQueue::new();
        queue.push(ThreadId(1), 10);
        queue.push(ThreadId(2), 20);
        queue.push(ThreadId(3), 10);
        queue.push(ThreadId(4), 20);

        assert_eq!(queue.drain(), vec![ThreadId(2), ThreadId(4), ThreadId(1), ThreadId(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_where_skips_ineligible() {
        let mut queue = WaitQueue::new();
        queue.push(ThreadId(1), 5);
        queue.push(ThreadId(2), 5);
        assert_eq!(queue.pop_where(|t| t == ThreadId(2)), Some(ThreadId(2)));
        assert_eq!(queue.pop_where(|t| t == ThreadId(9)), None);
        assert_eq!(queue.pop(), Some(ThreadId(1)));
    }

    #[test]
    fn test_remove_and_drain_where() {
        let mut queue = WaitQueue::new();
        for i in 0..5 {
            queue.push(ThreadId(i), 1);
        }
        assert!(queue.remove(ThreadId(2)));
        assert!(!queue.remove(ThreadId(2)));
        assert_eq!(queue.drain_where(|t| t.0 % 2 == 1), vec![ThreadId(1), ThreadId(3)]);
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec![ThreadId(0), ThreadId(4)]);
    }
}
