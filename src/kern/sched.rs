//! Scheduler for Chan_R
//!
//! Priority-based preemptive scheduling: one FIFO run queue per priority
//! level, the highest non-empty level runs. The scheduler also owns the
//! thread table, the event timer tree and the clock, and implements the
//! block/wake transitions every blocking call goes through.
//!
//! Lock order inside this module: thread table → timer tree → run queues.
//! Callers may hold a channel or connection lock when entering.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Mutex, MutexGuard};

use crate::error::KernResult;
use crate::kern::thread::{BlockInfo, BlockObject, BlockType, ThreadState, ThreadTable, Wakeup};
use crate::kern::timer::{EventHandle, EventTimerTree};
use crate::types::{Nanos, Priority, ProcessId, ThreadId, Timeout};

// ============================================================================
// Run Queues
// ============================================================================

/// Ready threads, one FIFO per priority level
#[derive(Debug)]
pub struct RunQueues {
    queues: Vec<VecDeque<ThreadId>>,
    /// Currently running thread
    current: Option<ThreadId>,
}

impl RunQueues {
    pub fn new(levels: usize) -> Self {
        let mut queues = Vec::with_capacity(levels);
        queues.resize_with(levels, VecDeque::new);
        Self {
            queues,
            current: None,
        }
    }

    fn level(&self, priority: Priority) -> usize {
        (priority as usize).min(self.queues.len() - 1)
    }

    pub fn push(&mut self, tid: ThreadId, priority: Priority) {
        let level = self.level(priority);
        self.queues[level].push_back(tid);
    }

    pub fn remove(&mut self, tid: ThreadId, priority: Priority) -> bool {
        let level = self.level(priority);
        let queue = &mut self.queues[level];
        match queue.iter().position(|t| *t == tid) {
            Some(pos) => {
                queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Take the first thread of the highest non-empty level
    pub fn pop_highest(&mut self) -> Option<ThreadId> {
        self.queues.iter_mut().rev().find_map(|q| q.pop_front())
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    pub fn ready_count(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Thread table, timers and run queues
#[derive(Debug)]
pub struct Scheduler {
    threads: Mutex<ThreadTable>,
    timers: Mutex<EventTimerTree>,
    runq: Mutex<RunQueues>,
    /// Monotonic clock, advanced by the timer interrupt
    clock: AtomicU64,
}

impl Scheduler {
    pub fn new(max_threads: usize, priority_levels: usize) -> Self {
        Self {
            threads: Mutex::new(ThreadTable::new(max_threads)),
            timers: Mutex::new(EventTimerTree::new()),
            runq: Mutex::new(RunQueues::new(priority_levels)),
            clock: AtomicU64::new(0),
        }
    }

    pub fn threads(&self) -> MutexGuard<'_, ThreadTable> {
        self.threads.lock()
    }

    pub fn now(&self) -> Nanos {
        self.clock.load(Ordering::Acquire)
    }

    /// Move the clock forward; returns the new time
    pub fn advance(&self, ns: Nanos) -> Nanos {
        let prev = self.clock.fetch_add(ns, Ordering::AcqRel);
        prev.saturating_add(ns)
    }

    pub fn next_deadline(&self) -> Option<Nanos> {
        self.timers.lock().next_deadline()
    }

    /// Pop every timer event due at `now`
    pub fn expire(&self, now: Nanos) -> Vec<(EventHandle, ThreadId)> {
        self.timers.lock().expire(now)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Create a READY thread and queue it
    pub fn spawn(
        &self,
        table: &mut ThreadTable,
        pid: ProcessId,
        priority: Priority,
    ) -> KernResult<ThreadId> {
        let tid = table.create(pid, priority)?;
        self.runq.lock().push(tid, priority);
        Ok(tid)
    }

    /// Park `tid`: BLOCKED, off the run queue, timer armed for a finite timeout
    ///
    /// The caller has already put the thread on the object's wait queue
    /// (or is about to, under the same object lock).
    pub fn block(
        &self,
        table: &mut ThreadTable,
        tid: ThreadId,
        kind: BlockType,
        object: BlockObject,
        timeout: Timeout,
    ) -> EventHandle {
        let now = self.now();
        let (event, timed) = {
            let mut timers = self.timers.lock();
            match timeout.deadline(now) {
                Some(deadline) => (timers.kevent_insert(deadline, tid), true),
                None => (timers.reserve_handle(), false),
            }
        };
        if let Some(thread) = table.get_mut(tid) {
            let mut runq = self.runq.lock();
            if thread.state == ThreadState::Ready {
                runq.remove(tid, thread.priority);
            }
            if runq.current == Some(tid) {
                runq.current = None;
            }
            thread.state = ThreadState::Blocked;
            thread.block = Some(BlockInfo {
                kind,
                object,
                event,
                timed,
            });
        }
        log::trace!("thread {} blocked {:?}", tid, kind);
        event
    }

    /// Retire `tid`'s block: disarm its timer and clear the record
    ///
    /// Leaves the thread BLOCKED; follow with [`Scheduler::ready`] or stop it.
    pub fn unblock(&self, table: &mut ThreadTable, tid: ThreadId) -> Option<BlockInfo> {
        let block = table.get_mut(tid)?.block.take()?;
        if block.timed {
            self.timers.lock().cancel(block.event);
        }
        Some(block)
    }

    /// Retire `tid`'s block with `result` and make it READY
    pub fn wake(&self, table: &mut ThreadTable, tid: ThreadId, result: Wakeup) {
        self.unblock(table, tid);
        if let Some(thread) = table.get_mut(tid) {
            thread.set_wakeup(result);
        }
        self.ready(table, tid);
    }

    /// Put a BLOCKED thread back on its run queue
    pub fn ready(&self, table: &mut ThreadTable, tid: ThreadId) {
        if let Some(thread) = table.get_mut(tid) {
            if thread.state == ThreadState::Blocked {
                thread.state = ThreadState::Ready;
                self.runq.lock().push(tid, thread.priority);
            }
        }
    }

    /// Take a thread off the CPU and run queues for good
    pub fn stop(&self, table: &mut ThreadTable, tid: ThreadId) {
        self.unblock(table, tid);
        if let Some(thread) = table.get_mut(tid) {
            let mut runq = self.runq.lock();
            if thread.state == ThreadState::Ready {
                runq.remove(tid, thread.priority);
            }
            if runq.current == Some(tid) {
                runq.current = None;
            }
            thread.state = ThreadState::Stopped;
            thread.pending = None;
        }
    }

    /// Pick the next thread to run
    ///
    /// A RUNNING thread goes back to the tail of its own queue first, so it
    /// keeps the CPU only if nothing of higher or equal priority is ready.
    pub fn schedule(&self) -> Option<ThreadId> {
        let mut table = self.threads.lock();
        let mut runq = self.runq.lock();
        if let Some(prev) = runq.current.take() {
            if let Some(thread) = table.get_mut(prev) {
                if thread.state == ThreadState::Running {
                    thread.state = ThreadState::Ready;
                    runq.push(prev, thread.priority);
                }
            }
        }
        let next = runq.pop_highest()?;
        if let Some(thread) = table.get_mut(next) {
            thread.state = ThreadState::Running;
        }
        runq.current = Some(next);
        Some(next)
    }

    pub fn current(&self) -> Option<ThreadId> {
        self.runq.lock().current()
    }

    pub fn ready_count(&self) -> usize {
        self.runq.lock().ready_count()
    }

    /// Fetch and clear a thread's wake-up result
    pub fn take_wakeup(&self, tid: ThreadId) -> Option<Wakeup> {
        self.threads.lock().get_mut(tid)?.take_wakeup()
    }
}
