//! Thread Management
//!
//! A thread belongs to exactly one process. The thread table is an arena
//! keyed by [`ThreadId`]; wait queues and timer events refer to threads by
//! id only, and everything a blocked thread is waiting with (its block
//! record, a pending send or connection request) lives in its entry here.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{KernError, KernResult};
use crate::ipc::channel::{ChannelObject, ConnectionInfo};
use crate::ipc::connection::PendingConnect;
use crate::ipc::message::ReceivedMessage;
use crate::ipc::rendezvous::PendingSend;
use crate::kern::timer::EventHandle;
use crate::kern::waitq::WaitQueue;
use crate::types::{ConnectionId, Priority, ProcessId, ThreadId};

// ============================================================================
// Thread State
// ============================================================================

/// Scheduling state of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// On the CPU
    Running,
    /// On a run queue
    Ready,
    /// Parked on a wait queue and/or a timer event
    Blocked,
    /// Exited; kept until its process is reaped so joins can complete
    Stopped,
}

/// What a blocked thread is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Client waiting for a connection handshake
    Connect,
    /// Server waiting for a connection request
    ConnectWait,
    Send,
    Receive,
    Join,
    /// Generic synchronization primitive, owned by the syn collaborator
    Syn,
    Sleep,
}

/// The object whose lock protects a blocked thread's queue membership
#[derive(Debug, Clone)]
pub enum BlockObject {
    None,
    Channel(Arc<ChannelObject>),
    Thread(ThreadId),
}

/// Record of a thread's current block
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub kind: BlockType,
    pub object: BlockObject,
    /// Identity of this block; armed in the timer tree when `timed`
    pub event: EventHandle,
    pub timed: bool,
}

/// Per-thread data carried while blocked
#[derive(Debug, Clone)]
pub enum Pending {
    Send(PendingSend),
    Connect(PendingConnect),
}

/// Value a blocking call completes with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Unit,
    Connected(ConnectionId),
    Request(ConnectionInfo),
    Message(ReceivedMessage),
}

/// Result stored in a thread's wake-up slot
pub type Wakeup = KernResult<Completion>;

// ============================================================================
// Thread
// ============================================================================

/// Thread control block
#[derive(Debug)]
pub struct Thread {
    pub tid: ThreadId,
    pub pid: ProcessId,
    pub priority: Priority,
    pub state: ThreadState,
    pub block: Option<BlockInfo>,
    pub pending: Option<Pending>,
    /// Threads blocked joining this one
    pub joiners: WaitQueue,
    wakeup: Option<Wakeup>,
}

impl Thread {
    fn new(tid: ThreadId, pid: ProcessId, priority: Priority) -> Self {
        Self {
            tid,
            pid,
            priority,
            state: ThreadState::Ready,
            block: None,
            pending: None,
            joiners: WaitQueue::new(),
            wakeup: None,
        }
    }

    /// True if the thread is still parked under the block identified by `event`
    pub fn is_blocked_by(&self, event: EventHandle) -> bool {
        self.state == ThreadState::Blocked
            && self.block.as_ref().is_some_and(|b| b.event == event)
    }

    pub fn pending_send(&self) -> Option<&PendingSend> {
        match &self.pending {
            Some(Pending::Send(send)) => Some(send),
            _ => None,
        }
    }

    pub fn pending_connect(&self) -> Option<&PendingConnect> {
        match &self.pending {
            Some(Pending::Connect(req)) => Some(req),
            _ => None,
        }
    }

    pub fn take_pending_send(&mut self) -> Option<PendingSend> {
        match self.pending.take() {
            Some(Pending::Send(send)) => Some(send),
            other => {
                self.pending = other;
                None
            }
        }
    }

    pub fn take_pending_connect(&mut self) -> Option<PendingConnect> {
        match self.pending.take() {
            Some(Pending::Connect(req)) => Some(req),
            other => {
                self.pending = other;
                None
            }
        }
    }

    pub(crate) fn set_wakeup(&mut self, result: Wakeup) {
        self.wakeup = Some(result);
    }

    pub(crate) fn take_wakeup(&mut self) -> Option<Wakeup> {
        self.wakeup.take()
    }
}

// ============================================================================
// Thread Table
// ============================================================================

/// Arena of thread control blocks
#[derive(Debug)]
pub struct ThreadTable {
    threads: BTreeMap<ThreadId, Thread>,
    next_tid: u32,
    limit: usize,
}

impl ThreadTable {
    pub fn new(limit: usize) -> Self {
        Self {
            threads: BTreeMap::new(),
            next_tid: 1,
            limit,
        }
    }

    /// Add a READY thread; the caller puts it on a run queue
    pub fn create(&mut self, pid: ProcessId, priority: Priority) -> KernResult<ThreadId> {
        if self.threads.len() >= self.limit {
            return Err(KernError::NoMemory);
        }
        let tid = ThreadId(self.next_tid);
        self.next_tid += 1;
        self.threads.insert(tid, Thread::new(tid, pid, priority));
        Ok(tid)
    }

    pub fn get(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    pub fn get_mut(&mut self, tid: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&tid)
    }

    /// Validate a thread entering the kernel
    ///
    /// Unknown → IllegalArgs, exited → Dead, already blocked → Busy.
    pub fn caller(&self, tid: ThreadId) -> KernResult<&Thread> {
        let thread = self.threads.get(&tid).ok_or(KernError::IllegalArgs)?;
        match thread.state {
            ThreadState::Running | ThreadState::Ready => Ok(thread),
            ThreadState::Blocked => Err(KernError::Busy),
            ThreadState::Stopped => Err(KernError::Dead),
        }
    }

    pub fn remove(&mut self, tid: ThreadId) -> Option<Thread> {
        self.threads.remove(&tid)
    }

    /// All threads of a process, in creation order
    pub fn threads_of(&self, pid: ProcessId) -> Vec<ThreadId> {
        self.threads
            .values()
            .filter(|t| t.pid == pid)
            .map(|t| t.tid)
            .collect()
    }

    pub fn is_alive(&self, tid: ThreadId) -> bool {
        self.threads
            .get(&tid)
            .is_some_and(|t| t.state != ThreadState::Stopped)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_creation() {
        let mut table = ThreadTable::new(4);
        let tid = table.create(ProcessId(1), 16).unwrap();
        let thread = table.get(tid).unwrap();
        assert_eq!(thread.pid, ProcessId(1));
        assert_eq!(thread.state, ThreadState::Ready);
        assert!(thread.block.is_none());
    }

    #[test]
    fn test_thread_table_limit() {
        let mut table = ThreadTable::new(2);
        table.create(ProcessId(1), 1).unwrap();
        table.create(ProcessId(1), 1).unwrap();
        assert_eq!(table.create(ProcessId(1), 1), Err(KernError::NoMemory));
    }

    #[test]
    fn test_caller_states() {
        let mut table = ThreadTable::new(4);
        let tid = table.create(ProcessId(1), 1).unwrap();
        assert!(table.caller(tid).is_ok());

        table.get_mut(tid).unwrap().state = ThreadState::Blocked;
        assert_eq!(table.caller(tid).err(), Some(KernError::Busy));

        table.get_mut(tid).unwrap().state = ThreadState::Stopped;
        assert_eq!(table.caller(tid).err(), Some(KernError::Dead));
        assert!(!table.is_alive(tid));

        assert_eq!(table.caller(ThreadId(99)).err(), Some(KernError::IllegalArgs));
    }

    #[test]
    fn test_threads_of() {
        let mut table = ThreadTable::new(8);
        let a = table.create(ProcessId(1), 1).unwrap();
        let _ = table.create(ProcessId(2), 1).unwrap();
        let c = table.create(ProcessId(1), 1).unwrap();
        assert_eq!(table.threads_of(ProcessId(1)), vec![a, c]);
    }

    #[test]
    fn test_wakeup_slot() {
        let mut table = ThreadTable::new(1);
        let tid = table.create(ProcessId(1), 1).unwrap();
        let thread = table.get_mut(tid).unwrap();
        thread.set_wakeup(Err(KernError::Timeout));
        assert_eq!(thread.take_wakeup(), Some(Err(KernError::Timeout)));
        assert_eq!(thread.take_wakeup(), None);
    }
}
