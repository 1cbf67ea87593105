//! Kernel state
//!
//! [`KernelState`] is built once at boot and passed to every core
//! operation. It holds the configuration, the VM collaborator, the process
//! table, the public name registry and the scheduler (thread table, timer
//! tree, run queues, clock).
//!
//! Lock order, outermost first:
//! channel object → connection object → thread table → timer tree → run queues.
//! The process table, the name registry and the per-process channel and
//! connection tables are leaves: nothing is locked while one is held,
//! except the channel table under the name registry when a channel is
//! opened or closed.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::config::{ConfigError, KernelConfig};
use crate::error::{KernError, KernResult};
use crate::ipc::channel::NameRegistry;
use crate::kern::process::{Process, ProcessTable};
use crate::kern::sched::Scheduler;
use crate::kern::thread::{
    BlockObject, BlockType, Completion, Thread, ThreadState, ThreadTable, Wakeup,
};
use crate::kern::timer::EventHandle;
use crate::types::{ChannelId, Nanos, Priority, ProcessId, Syscall, ThreadId, Timeout};
use crate::vm::VmOps;

/// How a block is being retired by something other than a rendezvous
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retire {
    /// Its timer event fired
    Expired,
    /// The thread is exiting
    Exiting,
}

/// Counters describing one channel, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    pub pending_requests: usize,
    pub connect_waiters: usize,
    pub negotiating: usize,
    pub receivers: usize,
    pub senders: usize,
    pub queued: usize,
    pub connections: usize,
    pub refs: usize,
}

/// The whole kernel
pub struct KernelState {
    config: KernelConfig,
    vm: Arc<dyn VmOps>,
    pub(crate) sched: Scheduler,
    processes: Mutex<ProcessTable>,
    pub(crate) names: Mutex<NameRegistry>,
}

impl KernelState {
    pub fn new(config: KernelConfig, vm: Arc<dyn VmOps>) -> Result<Self, ConfigError> {
        config.validate()?;
        crate::console::init_logger(config.log_level);
        log::info!(
            "kernel state: {} processes, {} threads, {} byte messages",
            config.max_processes,
            config.max_threads,
            config.max_message_size
        );
        Ok(Self {
            sched: Scheduler::new(config.max_threads, config.priority_levels),
            processes: Mutex::new(ProcessTable::new(config.max_processes)),
            names: Mutex::new(NameRegistry::new()),
            config,
            vm,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn vm(&self) -> &dyn VmOps {
        self.vm.as_ref()
    }

    pub fn process(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.processes.lock().get(pid)
    }

    /// Validate a calling thread; returns its process and priority
    pub(crate) fn caller(&self, tid: ThreadId) -> KernResult<(Arc<Process>, Priority)> {
        let (pid, priority) = {
            let table = self.sched.threads();
            let thread = table.caller(tid)?;
            (thread.pid, thread.priority)
        };
        let process = self.process(pid).ok_or(KernError::Dead)?;
        Ok((process, priority))
    }

    // ========================================================================
    // Processes
    // ========================================================================

    pub fn process_create(&self) -> KernResult<ProcessId> {
        let process = self.processes.lock().create(
            self.config.max_channels_per_process,
            self.config.max_connections_per_process,
        )?;
        log::debug!("process {} created", process.pid);
        Ok(process.pid)
    }

    /// Tear a process down: stop its threads, close its connections and
    /// channels, and reap its thread records
    pub fn process_exit(&self, pid: ProcessId) -> KernResult<()> {
        let process = self.process(pid).ok_or(KernError::IllegalArgs)?;

        let threads = self.sched.threads().threads_of(pid);
        for tid in &threads {
            match self.thread_exit(*tid) {
                Ok(()) | Err(KernError::Dead) => {}
                Err(err) => log::warn!("process {} exit: thread {}: {}", pid, tid, err),
            }
        }

        let connections = process.connections.lock().ids();
        for conid in connections {
            if let Err(err) = self.close_connection(pid, conid) {
                log::warn!("process {} exit: connection {}: {}", pid, conid, err);
            }
        }

        let channels = process.channels.lock().objects();
        for object in channels {
            match self.destroy_channel(&process.channels, &object) {
                Ok(()) | Err(KernError::AccessDenied) => {}
                Err(err) => log::warn!("process {} exit: channel {}: {}", pid, object.id(), err),
            }
        }

        {
            let mut table = self.sched.threads();
            for tid in threads {
                table.remove(tid);
            }
        }
        self.processes.lock().remove(pid);
        log::debug!("process {} exited", pid);
        Ok(())
    }

    // ========================================================================
    // Threads
    // ========================================================================

    /// Create a READY thread in `pid`
    pub fn thread_create(&self, pid: ProcessId, priority: Priority) -> KernResult<ThreadId> {
        if priority > self.config.max_priority() {
            return Err(KernError::IllegalArgs);
        }
        if self.process(pid).is_none() {
            return Err(KernError::IllegalArgs);
        }
        let tid = {
            let mut table = self.sched.threads();
            self.sched.spawn(&mut table, pid, priority)?
        };
        log::debug!("thread {} created in process {} at priority {}", tid, pid, priority);
        Ok(tid)
    }

    /// Create a thread at the configured default priority
    pub fn thread_create_default(&self, pid: ProcessId) -> KernResult<ThreadId> {
        self.thread_create(pid, self.config.default_priority)
    }

    /// Stop a thread
    ///
    /// Retires its block, fails the handshakes it holds as a server and the
    /// replies addressed to it, and wakes its joiners.
    pub fn thread_exit(&self, tid: ThreadId) -> KernResult<()> {
        let (pid, event) = {
            let table = self.sched.threads();
            let thread = table.get(tid).ok_or(KernError::IllegalArgs)?;
            if thread.state == ThreadState::Stopped {
                return Err(KernError::Dead);
            }
            (thread.pid, thread.block.as_ref().map(|b| b.event))
        };
        if let Some(event) = event {
            self.retire_block(tid, event, Retire::Exiting);
        }

        if let Some(process) = self.process(pid) {
            let channels = process.channels.lock().objects();
            let mut discard = Vec::new();
            for object in &channels {
                discard.extend(self.release_thread_from_channel(object, tid));
            }
            for req in discard {
                self.discard_pending_connection(req);
            }
        }

        let mut table = self.sched.threads();
        self.sched.stop(&mut table, tid);
        let joiners = table
            .get_mut(tid)
            .map(|t| t.joiners.drain())
            .unwrap_or_default();
        for joiner in joiners {
            self.sched.wake(&mut table, joiner, Ok(Completion::Unit));
        }
        log::debug!("thread {} exited", tid);
        Ok(())
    }

    /// Wait for `target` to exit
    pub fn thread_join(
        &self,
        tid: ThreadId,
        target: ThreadId,
        timeout: Timeout,
    ) -> KernResult<Syscall<()>> {
        let mut table = self.sched.threads();
        let priority = table.caller(tid)?.priority;
        if target == tid {
            return Err(KernError::IllegalArgs);
        }
        let target_thread = table.get_mut(target).ok_or(KernError::IllegalArgs)?;
        if target_thread.state == ThreadState::Stopped {
            return Ok(Syscall::Complete(()));
        }
        if timeout.is_poll() {
            return Err(KernError::Timeout);
        }
        target_thread.joiners.push(tid, priority);
        self.sched.block(
            &mut table,
            tid,
            BlockType::Join,
            BlockObject::Thread(target),
            timeout,
        );
        Ok(Syscall::Blocked)
    }

    /// Block for `timeout`; expiry completes the call successfully
    pub fn thread_sleep(&self, tid: ThreadId, timeout: Timeout) -> KernResult<Syscall<()>> {
        let mut table = self.sched.threads();
        table.caller(tid)?;
        if timeout.is_infinite() {
            return Err(KernError::IllegalArgs);
        }
        if timeout.is_poll() {
            return Ok(Syscall::Complete(()));
        }
        self.sched
            .block(&mut table, tid, BlockType::Sleep, BlockObject::None, timeout);
        Ok(Syscall::Blocked)
    }

    pub fn thread_state(&self, tid: ThreadId) -> Option<ThreadState> {
        self.sched.threads().get(tid).map(|t| t.state)
    }

    pub fn thread_process(&self, tid: ThreadId) -> Option<ProcessId> {
        self.sched.threads().get(tid).map(|t| t.pid)
    }

    /// Pick the next thread to run
    pub fn schedule(&self) -> Option<ThreadId> {
        self.sched.schedule()
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        self.sched.current()
    }

    /// Collect the result a woken thread's blocking call completed with
    pub fn take_wakeup(&self, tid: ThreadId) -> Option<Wakeup> {
        self.sched.take_wakeup(tid)
    }

    // ========================================================================
    // Time
    // ========================================================================

    pub fn now(&self) -> Nanos {
        self.sched.now()
    }

    pub fn next_deadline(&self) -> Option<Nanos> {
        self.sched.next_deadline()
    }

    pub fn pending_timers(&self) -> usize {
        self.sched.pending_timers()
    }

    /// Timer interrupt: move the clock and retire expired blocks
    ///
    /// Returns the number of threads woken by a timeout.
    pub fn advance_clock(&self, ns: Nanos) -> usize {
        self.sched.advance(ns);
        self.expire_timers()
    }

    /// Retire every block whose deadline has passed
    pub fn expire_timers(&self) -> usize {
        self.sched
            .expire(self.sched.now())
            .into_iter()
            .filter(|&(event, tid)| self.retire_block(tid, event, Retire::Expired))
            .count()
    }

    /// Retire the block identified by `event`, unless a rendezvous got there first
    ///
    /// The block's object lock is taken before the thread table, and the
    /// thread is rechecked under both: whoever finds the handle still in
    /// place owns the outcome.
    fn retire_block(&self, tid: ThreadId, event: EventHandle, how: Retire) -> bool {
        let block = {
            let table = self.sched.threads();
            match table.get(tid) {
                Some(thread) if thread.is_blocked_by(event) => thread.block.clone(),
                _ => None,
            }
        };
        let Some(block) = block else {
            return false;
        };

        let outcome = || -> Option<Wakeup> {
            match how {
                Retire::Exiting => None,
                Retire::Expired if block.kind == BlockType::Sleep => Some(Ok(Completion::Unit)),
                Retire::Expired => Some(Err(KernError::Timeout)),
            }
        };

        match &block.object {
            BlockObject::Channel(object) => {
                let discard = {
                    let mut chan = object.lock();
                    let mut table = self.sched.threads();
                    if !table.get(tid).is_some_and(|t| t.is_blocked_by(event)) {
                        return false;
                    }
                    chan.forget_waiter(tid, block.kind);
                    let discard = table.get_mut(tid).and_then(Thread::take_pending_connect);
                    self.finish_retire(&mut table, tid, outcome());
                    discard
                };
                if let Some(req) = discard {
                    self.discard_pending_connection(req);
                }
            }
            BlockObject::Thread(target) => {
                let mut table = self.sched.threads();
                if !table.get(tid).is_some_and(|t| t.is_blocked_by(event)) {
                    return false;
                }
                if let Some(target) = table.get_mut(*target) {
                    target.joiners.remove(tid);
                }
                self.finish_retire(&mut table, tid, outcome());
            }
            BlockObject::None => {
                let mut table = self.sched.threads();
                if !table.get(tid).is_some_and(|t| t.is_blocked_by(event)) {
                    return false;
                }
                self.finish_retire(&mut table, tid, outcome());
            }
        }
        log::trace!("thread {} block {:?} retired ({:?})", tid, block.kind, how);
        true
    }

    fn finish_retire(
        &self,
        table: &mut ThreadTable,
        tid: ThreadId,
        outcome: Option<Wakeup>,
    ) {
        if let Some(thread) = table.get_mut(tid) {
            thread.pending = None;
        }
        match outcome {
            Some(result) => self.sched.wake(table, tid, result),
            None => {
                self.sched.unblock(table, tid);
            }
        }
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Queue and connection counters of an open channel
    pub fn channel_stats(&self, pid: ProcessId, chid: ChannelId) -> Option<ChannelStats> {
        let object = self.process(pid)?.channel(chid)?;
        let chan = object.lock();
        Some(ChannelStats {
            pending_requests: chan.connect_requests.len(),
            connect_waiters: chan.connect_waiters.len(),
            negotiating: chan.negotiating.len(),
            receivers: chan.receivers.len(),
            senders: chan.senders.len(),
            queued: chan.mailbox.len(),
            connections: chan.connections,
            refs: object.refs(),
        })
    }

    /// Number of connection slots a process holds
    pub fn connection_count(&self, pid: ProcessId) -> usize {
        self.process(pid)
            .map(|p| p.connections.lock().len())
            .unwrap_or(0)
    }

    /// Channel ids currently open in a process
    pub fn channel_ids(&self, pid: ProcessId) -> Vec<ChannelId> {
        self.process(pid)
            .map(|p| p.channels.lock().ids())
            .unwrap_or_default()
    }

    /// True while `chid` may not be reused in `pid` (open or retired)
    pub fn channel_id_in_use(&self, pid: ProcessId, chid: ChannelId) -> bool {
        self.process(pid)
            .is_some_and(|p| p.channels.lock().in_use(chid))
    }

    pub fn name_registered(&self, path: &str) -> bool {
        self.names.lock().contains(path)
    }
}

impl core::fmt::Debug for KernelState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelState")
            .field("config", &self.config)
            .field("processes", &self.processes.lock().len())
            .field("threads", &self.sched.threads().len())
            .field("now", &self.sched.now())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{MapAttrs, VmError};

    struct NoVm;

    impl VmOps for NoVm {
        fn share(&self, _: ProcessId, _: usize, _: usize, _: ProcessId, _: MapAttrs) -> Result<usize, VmError> {
            Err(VmError::NoMemory)
        }
        fn unshare(&self, _: ProcessId, _: usize, _: usize) {}
        fn copy_in(&self, _: ProcessId, _: usize, _: &mut [u8]) -> Result<(), VmError> {
            Err(VmError::BadAddress)
        }
        fn copy_out(&self, _: ProcessId, _: usize, _: &[u8]) -> Result<(), VmError> {
            Err(VmError::BadAddress)
        }
    }

    fn kernel() -> KernelState {
        KernelState::new(KernelConfig::default(), Arc::new(NoVm)).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = KernelConfig {
            max_threads: 0,
            ..KernelConfig::default()
        };
        assert!(KernelState::new(config, Arc::new(NoVm)).is_err());
    }

    #[test]
    fn test_thread_lifecycle() {
        let kernel = kernel();
        let pid = kernel.process_create().unwrap();
        let tid = kernel.thread_create_default(pid).unwrap();
        assert_eq!(kernel.thread_state(tid), Some(ThreadState::Ready));
        assert_eq!(kernel.schedule(), Some(tid));
        assert_eq!(kernel.thread_state(tid), Some(ThreadState::Running));

        kernel.thread_exit(tid).unwrap();
        assert_eq!(kernel.thread_state(tid), Some(ThreadState::Stopped));
        assert_eq!(kernel.thread_exit(tid), Err(KernError::Dead));
        assert_eq!(kernel.schedule(), None);
    }

    #[test]
    fn test_thread_create_checks() {
        let kernel = kernel();
        let pid = kernel.process_create().unwrap();
        assert_eq!(kernel.thread_create(pid, 200), Err(KernError::IllegalArgs));
        assert_eq!(
            kernel.thread_create(ProcessId(99), 1),
            Err(KernError::IllegalArgs)
        );
    }

    #[test]
    fn test_sleep_expiry_is_success() {
        let kernel = kernel();
        let pid = kernel.process_create().unwrap();
        let tid = kernel.thread_create_default(pid).unwrap();

        assert_eq!(kernel.thread_sleep(tid, Timeout::POLL), Ok(Syscall::Complete(())));
        assert_eq!(
            kernel.thread_sleep(tid, Timeout::INFINITY),
            Err(KernError::IllegalArgs)
        );
        assert!(kernel.thread_sleep(tid, Timeout::from_nanos(100)).unwrap().is_blocked());
        assert_eq!(kernel.thread_state(tid), Some(ThreadState::Blocked));
        assert_eq!(kernel.thread_sleep(tid, Timeout::from_nanos(1)), Err(KernError::Busy));

        assert_eq!(kernel.advance_clock(99), 0);
        assert_eq!(kernel.advance_clock(1), 1);
        assert_eq!(kernel.take_wakeup(tid), Some(Ok(Completion::Unit)));
        assert_eq!(kernel.thread_state(tid), Some(ThreadState::Ready));
        assert_eq!(kernel.pending_timers(), 0);
    }

    #[test]
    fn test_join_wakes_on_exit() {
        let kernel = kernel();
        let pid = kernel.process_create().unwrap();
        let worker = kernel.thread_create_default(pid).unwrap();
        let waiter = kernel.thread_create_default(pid).unwrap();

        assert_eq!(kernel.thread_join(waiter, waiter, Timeout::INFINITY), Err(KernError::IllegalArgs));
        assert_eq!(kernel.thread_join(waiter, worker, Timeout::POLL), Err(KernError::Timeout));
        assert!(kernel
            .thread_join(waiter, worker, Timeout::from_millis(5))
            .unwrap()
            .is_blocked());

        kernel.thread_exit(worker).unwrap();
        assert_eq!(kernel.take_wakeup(waiter), Some(Ok(Completion::Unit)));
        assert_eq!(kernel.pending_timers(), 0);
        assert_eq!(
            kernel.thread_join(waiter, worker, Timeout::POLL),
            Ok(Syscall::Complete(()))
        );
    }

    #[test]
    fn test_join_timeout() {
        let kernel = kernel();
        let pid = kernel.process_create().unwrap();
        let worker = kernel.thread_create_default(pid).unwrap();
        let waiter = kernel.thread_create_default(pid).unwrap();

        let _ = kernel.thread_join(waiter, worker, Timeout::from_nanos(10)).unwrap();
        assert_eq!(kernel.advance_clock(10), 1);
        assert_eq!(kernel.take_wakeup(waiter), Some(Err(KernError::Timeout)));
        // The exit no longer finds the joiner
        kernel.thread_exit(worker).unwrap();
        assert_eq!(kernel.take_wakeup(waiter), None);
    }

    #[test]
    fn test_exit_of_blocked_thread_disarms_timer() {
        let kernel = kernel();
        let pid = kernel.process_create().unwrap();
        let tid = kernel.thread_create_default(pid).unwrap();
        let _ = kernel.thread_sleep(tid, Timeout::from_nanos(50)).unwrap();
        assert_eq!(kernel.pending_timers(), 1);
        kernel.thread_exit(tid).unwrap();
        assert_eq!(kernel.pending_timers(), 0);
        assert_eq!(kernel.advance_clock(100), 0);
        assert_eq!(kernel.take_wakeup(tid), None);
    }

    #[test]
    fn test_process_exit_reaps_threads() {
        let kernel = kernel();
        let pid = kernel.process_create().unwrap();
        let tid = kernel.thread_create_default(pid).unwrap();
        kernel.process_exit(pid).unwrap();
        assert_eq!(kernel.thread_state(tid), None);
        assert!(kernel.process(pid).is_none());
        assert_eq!(kernel.process_exit(pid), Err(KernError::IllegalArgs));
    }
}
