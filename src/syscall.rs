//! System call switch
//!
//! Maps syscall numbers to kernel operations. Arguments arrive as raw
//! register words; each handler decodes them into typed values (reading
//! user structures through the VM collaborator) before calling into
//! [`KernelState`], and folds the outcome back into a register value
//! (negative = error).
//!
//! A call that parks the thread returns [`SyscallReturn::Blocked`]. When
//! the thread is later woken, [`SyscallTable::resume`] turns its wake-up
//! result into the register value, copying any received connection info or
//! message out to the buffer the call named.
//!
//! ## Numbers
//!
//! - 0-3: channel open / close / wait connection / complete connection
//! - 4-5: connection open / close
//! - 6-7: send / receive
//! - 8: signal

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::error::{to_register, KernError, KernResult, OK};
use crate::ipc::channel::{ChannelFlags, ChannelKind, ChannelName, ConnectCommand, ConnectionInfo};
use crate::ipc::connection::ConnectTarget;
use crate::ipc::message::{
    Message, ReceivedMessage, SendFlags, SharedRegion, SignalInfo, SystemMessage, UserBuffer,
};
use crate::kern::thread::{Completion, ThreadState};
use crate::kernel::KernelState;
use crate::types::{ChannelId, ChannelRef, ConnectionId, ProcessId, Syscall, ThreadId, Timeout};
use crate::vm::MapAttrs;

// ============================================================================
// Syscall Numbers
// ============================================================================

pub const SYS_CHANNEL_OPEN: usize = 0;
pub const SYS_CHANNEL_CLOSE: usize = 1;
pub const SYS_CHANNEL_WAIT_CONNECTION: usize = 2;
pub const SYS_CHANNEL_COMPLETE_CONNECTION: usize = 3;
pub const SYS_CONNECTION_OPEN: usize = 4;
pub const SYS_CONNECTION_CLOSE: usize = 5;
pub const SYS_SEND: usize = 6;
pub const SYS_RECEIVE: usize = 7;
pub const SYS_SIGNAL: usize = 8;

/// Number of syscall slots
pub const SYSCALL_COUNT: usize = 9;

/// Timeout register value meaning "wait forever"
pub const TIMEOUT_INFINITE: usize = usize::MAX;

/// Channel kind register values
pub const KIND_PRIVATE: usize = 0;
pub const KIND_PUBLIC: usize = 1;

// ============================================================================
// User Structures
// ============================================================================

/// `SystemMessage` discriminants in the user message layout
pub const SYS_MSG_NONE: u64 = 0;
pub const SYS_MSG_SIGNAL: u64 = 1;
pub const SYS_MSG_SHARE_MEMORY: u64 = 2;

/// Words of an outgoing message: data addr, data len, system kind, 5 payload words
pub const SEND_MSG_WORDS: usize = 8;
/// Words of a received message: the outgoing layout plus sender pid, tid,
/// connection, and reply connection (0 = none)
pub const RECV_MSG_WORDS: usize = SEND_MSG_WORDS + 4;
/// Words of a connection info block: pid, tid, connection
pub const CONN_INFO_WORDS: usize = 3;

const WORD: usize = core::mem::size_of::<u64>();

fn words_to_bytes(words: &[u64]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(WORD)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect()
}

/// Encode the message part shared by both layouts
fn encode_message(data: UserBuffer, sys: SystemMessage) -> [u64; SEND_MSG_WORDS] {
    let mut words = [0u64; SEND_MSG_WORDS];
    words[0] = data.addr as u64;
    words[1] = data.len as u64;
    match sys {
        SystemMessage::None => words[2] = SYS_MSG_NONE,
        SystemMessage::Signal(info) => {
            words[2] = SYS_MSG_SIGNAL;
            words[3] = u64::from(info.pid.0);
            words[4] = u64::from(info.tid.0);
            words[5] = u64::from(info.signo);
            words[6] = info.code as i64 as u64;
            words[7] = info.value as u64;
        }
        SystemMessage::ShareMemory(region) => {
            words[2] = SYS_MSG_SHARE_MEMORY;
            words[3] = region.addr as u64;
            words[4] = region.size as u64;
            words[5] = u64::from(region.attrs.bits());
        }
    }
    words
}

/// Decode an outgoing message written by user space
pub fn decode_message(words: &[u64]) -> KernResult<Message> {
    if words.len() < SEND_MSG_WORDS {
        return Err(KernError::IllegalArgs);
    }
    let data = UserBuffer::new(words[0] as usize, words[1] as usize);
    let sys = match words[2] {
        SYS_MSG_NONE => SystemMessage::None,
        SYS_MSG_SIGNAL => SystemMessage::Signal(SignalInfo {
            pid: ProcessId(words[3] as u32),
            tid: ThreadId(words[4] as u32),
            signo: words[5] as u32,
            code: words[6] as i64 as i32,
            value: words[7] as usize,
        }),
        SYS_MSG_SHARE_MEMORY => SystemMessage::ShareMemory(SharedRegion {
            addr: words[3] as usize,
            size: words[4] as usize,
            attrs: MapAttrs::from_bits(words[5] as u32).ok_or(KernError::IllegalArgs)?,
        }),
        _ => return Err(KernError::IllegalArgs),
    };
    Ok(Message::with_system(data, sys))
}

/// Encode a message delivered to a receiver
pub fn encode_received(msg: &ReceivedMessage) -> [u64; RECV_MSG_WORDS] {
    let mut words = [0u64; RECV_MSG_WORDS];
    words[..SEND_MSG_WORDS].copy_from_slice(&encode_message(msg.data, msg.sys));
    words[8] = u64::from(msg.sender.pid.0);
    words[9] = u64::from(msg.sender.tid.0);
    words[10] = u64::from(msg.sender.connection.0);
    words[11] = msg.reply.map_or(0, |c| u64::from(c.0));
    words
}

pub fn encode_connection_info(info: &ConnectionInfo) -> [u64; CONN_INFO_WORDS] {
    [
        u64::from(info.pid.0),
        u64::from(info.tid.0),
        u64::from(info.connection.0),
    ]
}

// ============================================================================
// Arguments
// ============================================================================

/// Syscall arguments passed to a handler
#[derive(Debug, Clone, Default)]
pub struct SyscallArgs {
    /// Argument registers
    pub args: [usize; 6],
}

impl SyscallArgs {
    pub fn with_args(args: &[usize]) -> Self {
        let mut sys_args = Self::default();
        let count = args.len().min(6);
        sys_args.args[..count].copy_from_slice(&args[..count]);
        sys_args
    }

    pub fn arg(&self, index: usize) -> usize {
        self.args.get(index).copied().unwrap_or(0)
    }

    pub fn arg_u32(&self, index: usize) -> KernResult<u32> {
        u32::try_from(self.arg(index)).map_err(|_| KernError::IllegalArgs)
    }

    pub fn arg_timeout(&self, index: usize) -> Timeout {
        match self.arg(index) {
            TIMEOUT_INFINITE => Timeout::INFINITY,
            ns => Timeout::from_nanos(ns as u64),
        }
    }
}

/// Register outcome of a syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallReturn {
    Value(isize),
    /// The thread is parked; call [`SyscallTable::resume`] once it wakes
    Blocked,
}

/// Where a blocked call's result is copied once it completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyOut {
    ConnectionInfo(usize),
    Message(usize),
}

/// What a handler produced
enum Outcome {
    Done(isize),
    Blocked,
}

/// Handler signature
type SyscallHandler = fn(&SyscallTable, &KernelState, ThreadId, &SyscallArgs) -> KernResult<Outcome>;

/// Syscall table entry
#[derive(Clone)]
pub struct SyscallEntry {
    pub name: &'static str,
    pub arg_count: u8,
    /// May park the caller
    pub blocking: bool,
    handler: SyscallHandler,
}

impl SyscallEntry {
    const fn new(name: &'static str, arg_count: u8, handler: SyscallHandler) -> Self {
        Self {
            name,
            arg_count,
            blocking: false,
            handler,
        }
    }

    const fn blocking(name: &'static str, arg_count: u8, handler: SyscallHandler) -> Self {
        Self {
            name,
            arg_count,
            blocking: true,
            handler,
        }
    }
}

impl core::fmt::Debug for SyscallEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyscallEntry")
            .field("name", &self.name)
            .field("arg_count", &self.arg_count)
            .field("blocking", &self.blocking)
            .finish()
    }
}

// ============================================================================
// Handlers
// ============================================================================

impl SyscallTable {
    fn caller_pid(kernel: &KernelState, tid: ThreadId) -> KernResult<ProcessId> {
        kernel.thread_process(tid).ok_or(KernError::IllegalArgs)
    }

    /// Copy a pathname in from user space
    fn copy_in_path(kernel: &KernelState, pid: ProcessId, addr: usize, len: usize) -> KernResult<String> {
        if len == 0 || len > kernel.config().max_pathname_len {
            return Err(KernError::IllegalArgs);
        }
        let mut buf = vec![0u8; len];
        kernel.vm().copy_in(pid, addr, &mut buf)?;
        String::from_utf8(buf).map_err(|_| KernError::IllegalArgs)
    }

    fn copy_out_words(kernel: &KernelState, pid: ProcessId, addr: usize, words: &[u64]) -> KernResult<()> {
        kernel.vm().copy_out(pid, addr, &words_to_bytes(words))?;
        Ok(())
    }

    /// Make sure `addr` takes `words` words before the kernel commits to a
    /// rendezvous whose result would otherwise have nowhere to go
    fn check_out_buffer(kernel: &KernelState, pid: ProcessId, addr: usize, words: usize) -> KernResult<()> {
        kernel.vm().copy_out(pid, addr, &vec![0u8; words * WORD])?;
        Ok(())
    }

    /// Remember where a blocking call's result goes
    ///
    /// Recorded before entering the kernel: once the thread is parked another
    /// CPU may wake it and call [`SyscallTable::resume`] at any time.
    /// Entries of exited threads, which never resume, are dropped here.
    fn record_copy_out(&self, kernel: &KernelState, tid: ThreadId, copy: CopyOut) {
        let mut pending = self.pending.lock();
        pending.retain(|&other, _| {
            matches!(
                kernel.thread_state(other),
                Some(ThreadState::Running | ThreadState::Ready | ThreadState::Blocked)
            )
        });
        pending.insert(tid, copy);
    }

    /// Perform a copy-out for a completed wait or receive
    fn finish_copy_out(kernel: &KernelState, pid: ProcessId, copy: CopyOut, done: &Completion) -> KernResult<isize> {
        match (copy, done) {
            (CopyOut::ConnectionInfo(addr), Completion::Request(info)) => {
                Self::copy_out_words(kernel, pid, addr, &encode_connection_info(info))?;
            }
            (CopyOut::Message(addr), Completion::Message(msg)) => {
                Self::copy_out_words(kernel, pid, addr, &encode_received(msg))?;
            }
            _ => return Err(KernError::IllegalArgs),
        }
        Ok(OK)
    }

    /// arg0: kind, arg1: path ptr (0 = none), arg2: path len or well-known id,
    /// arg3: capacity, arg4: flags
    fn sys_channel_open(&self, kernel: &KernelState, tid: ThreadId, args: &SyscallArgs) -> KernResult<Outcome> {
        let pid = Self::caller_pid(kernel, tid)?;
        let kind = match args.arg(0) {
            KIND_PRIVATE => ChannelKind::Private,
            KIND_PUBLIC => ChannelKind::Public,
            _ => return Err(KernError::IllegalArgs),
        };
        let flags = ChannelFlags::from_bits(args.arg_u32(4)?).ok_or(KernError::IllegalArgs)?;
        let path;
        let name = match (args.arg(1), args.arg(2)) {
            (0, 0) => ChannelName::Anonymous,
            (0, id) => ChannelName::Id(ChannelId(u32::try_from(id).map_err(|_| KernError::IllegalArgs)?)),
            (addr, len) => {
                path = Self::copy_in_path(kernel, pid, addr, len)?;
                ChannelName::Path(&path)
            }
        };
        let chid = kernel.open_channel(tid, kind, name, args.arg(3), flags)?;
        Ok(Outcome::Done(chid.0 as isize))
    }

    /// arg0: channel id
    fn sys_channel_close(&self, kernel: &KernelState, tid: ThreadId, args: &SyscallArgs) -> KernResult<Outcome> {
        let pid = Self::caller_pid(kernel, tid)?;
        kernel.close_channel(pid, ChannelId(args.arg_u32(0)?))?;
        Ok(Outcome::Done(OK))
    }

    /// arg0: channel id, arg1: out info ptr, arg2: timeout
    fn sys_channel_wait_connection(&self, kernel: &KernelState, tid: ThreadId, args: &SyscallArgs) -> KernResult<Outcome> {
        let pid = Self::caller_pid(kernel, tid)?;
        let chid = ChannelId(args.arg_u32(0)?);
        let copy = CopyOut::ConnectionInfo(args.arg(1));
        Self::check_out_buffer(kernel, pid, args.arg(1), CONN_INFO_WORDS)?;
        self.record_copy_out(kernel, tid, copy);
        match kernel.channel_connection_wait(tid, chid, args.arg_timeout(2))? {
            Syscall::Complete(info) => Ok(Outcome::Done(Self::finish_copy_out(
                kernel,
                pid,
                copy,
                &Completion::Request(info),
            )?)),
            Syscall::Blocked => Ok(Outcome::Blocked),
        }
    }

    /// arg0: channel id, arg1: command, arg2: command result
    fn sys_channel_complete_connection(&self, kernel: &KernelState, tid: ThreadId, args: &SyscallArgs) -> KernResult<Outcome> {
        let cmd = ConnectCommand::from_raw(args.arg_u32(1)?, args.arg_u32(2)?)
            .ok_or(KernError::IllegalArgs)?;
        kernel.channel_connection_complete(tid, ChannelId(args.arg_u32(0)?), cmd)?;
        Ok(Outcome::Done(OK))
    }

    /// arg0: path ptr (0 = by id), arg1: path len or target pid,
    /// arg2: target channel id, arg3: reply channel (0 = none), arg4: timeout
    fn sys_connection_open(&self, kernel: &KernelState, tid: ThreadId, args: &SyscallArgs) -> KernResult<Outcome> {
        let pid = Self::caller_pid(kernel, tid)?;
        let path;
        let target = match args.arg(0) {
            0 => ConnectTarget::Channel(ChannelRef::new(
                ProcessId(args.arg_u32(1)?),
                ChannelId(args.arg_u32(2)?),
            )),
            addr => {
                path = Self::copy_in_path(kernel, pid, addr, args.arg(1))?;
                ConnectTarget::Path(&path)
            }
        };
        let reply = match args.arg_u32(3)? {
            0 => None,
            id => Some(ChannelId(id)),
        };
        match kernel.open_connection(tid, target, args.arg_timeout(4), reply)? {
            Syscall::Complete(conid) => Ok(Outcome::Done(conid.0 as isize)),
            Syscall::Blocked => Ok(Outcome::Blocked),
        }
    }

    /// arg0: connection id
    fn sys_connection_close(&self, kernel: &KernelState, tid: ThreadId, args: &SyscallArgs) -> KernResult<Outcome> {
        let pid = Self::caller_pid(kernel, tid)?;
        kernel.close_connection(pid, ConnectionId(args.arg_u32(0)?))?;
        Ok(Outcome::Done(OK))
    }

    /// arg0: connection id, arg1: message ptr, arg2: timeout, arg3: flags
    fn sys_send(&self, kernel: &KernelState, tid: ThreadId, args: &SyscallArgs) -> KernResult<Outcome> {
        let pid = Self::caller_pid(kernel, tid)?;
        let flags = SendFlags::from_bits(args.arg_u32(3)?).ok_or(KernError::IllegalArgs)?;
        let mut raw = [0u8; SEND_MSG_WORDS * WORD];
        kernel.vm().copy_in(pid, args.arg(1), &mut raw)?;
        let msg = decode_message(&bytes_to_words(&raw))?;
        match kernel.send(tid, ConnectionId(args.arg_u32(0)?), msg, args.arg_timeout(2), flags)? {
            Syscall::Complete(()) => Ok(Outcome::Done(OK)),
            Syscall::Blocked => Ok(Outcome::Blocked),
        }
    }

    /// arg0: channel id, arg1: out message ptr, arg2: timeout
    fn sys_receive(&self, kernel: &KernelState, tid: ThreadId, args: &SyscallArgs) -> KernResult<Outcome> {
        let pid = Self::caller_pid(kernel, tid)?;
        let chid = ChannelId(args.arg_u32(0)?);
        let copy = CopyOut::Message(args.arg(1));
        Self::check_out_buffer(kernel, pid, args.arg(1), RECV_MSG_WORDS)?;
        self.record_copy_out(kernel, tid, copy);
        match kernel.receive(tid, chid, args.arg_timeout(2))? {
            Syscall::Complete(msg) => Ok(Outcome::Done(Self::finish_copy_out(
                kernel,
                pid,
                copy,
                &Completion::Message(msg),
            )?)),
            Syscall::Blocked => Ok(Outcome::Blocked),
        }
    }

    /// arg0: target pid, arg1: signal number, arg2: code, arg3: value
    fn sys_signal(&self, kernel: &KernelState, tid: ThreadId, args: &SyscallArgs) -> KernResult<Outcome> {
        kernel.signal_to_proc(
            tid,
            ProcessId(args.arg_u32(0)?),
            args.arg_u32(1)?,
            args.arg(2) as i32,
            args.arg(3),
        )?;
        Ok(Outcome::Done(OK))
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Syscall execution statistics
#[derive(Debug)]
pub struct SyscallStats {
    pub total_calls: AtomicU64,
    pub invalid_calls: AtomicU64,
    pub blocked_calls: AtomicU64,
    pub failed_calls: AtomicU64,
}

impl SyscallStats {
    pub const fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            invalid_calls: AtomicU64::new(0),
            blocked_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> SyscallStatsSnapshot {
        SyscallStatsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            invalid_calls: self.invalid_calls.load(Ordering::Relaxed),
            blocked_calls: self.blocked_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of syscall statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyscallStatsSnapshot {
    pub total_calls: u64,
    pub invalid_calls: u64,
    pub blocked_calls: u64,
    pub failed_calls: u64,
}

// ============================================================================
// Syscall Table
// ============================================================================

/// The syscall table
#[derive(Debug)]
pub struct SyscallTable {
    entries: Vec<SyscallEntry>,
    /// Deferred copy-outs of blocked calls, by thread
    pending: Mutex<BTreeMap<ThreadId, CopyOut>>,
    stats: SyscallStats,
}

impl SyscallTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(SYSCALL_COUNT);
        entries.push(SyscallEntry::new("channel_open", 5, Self::sys_channel_open));
        entries.push(SyscallEntry::new("channel_close", 1, Self::sys_channel_close));
        entries.push(SyscallEntry::blocking(
            "channel_wait_connection",
            3,
            Self::sys_channel_wait_connection,
        ));
        entries.push(SyscallEntry::new(
            "channel_complete_connection",
            3,
            Self::sys_channel_complete_connection,
        ));
        entries.push(SyscallEntry::blocking("connection_open", 5, Self::sys_connection_open));
        entries.push(SyscallEntry::new("connection_close", 1, Self::sys_connection_close));
        entries.push(SyscallEntry::blocking("send", 4, Self::sys_send));
        entries.push(SyscallEntry::blocking("receive", 3, Self::sys_receive));
        entries.push(SyscallEntry::new("signal", 4, Self::sys_signal));
        Self {
            entries,
            pending: Mutex::new(BTreeMap::new()),
            stats: SyscallStats::new(),
        }
    }

    /// Get the entry for a syscall number
    pub fn get(&self, sysno: usize) -> Option<&SyscallEntry> {
        self.entries.get(sysno)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> SyscallStatsSnapshot {
        self.stats.snapshot()
    }

    /// Blocked calls still waiting to copy a result out
    pub fn pending_copy_outs(&self) -> usize {
        self.pending.lock().len()
    }

    /// Execute syscall `sysno` for thread `tid`
    pub fn dispatch(
        &self,
        kernel: &KernelState,
        tid: ThreadId,
        sysno: usize,
        args: &SyscallArgs,
    ) -> SyscallReturn {
        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
        let Some(entry) = self.get(sysno) else {
            self.stats.invalid_calls.fetch_add(1, Ordering::Relaxed);
            log::debug!("thread {} invalid syscall {}", tid, sysno);
            return SyscallReturn::Value(KernError::IllegalArgs.code());
        };

        let outcome = (entry.handler)(self, kernel, tid, args);
        if !matches!(outcome, Ok(Outcome::Blocked)) {
            self.pending.lock().remove(&tid);
        }
        match outcome {
            Ok(Outcome::Done(value)) => SyscallReturn::Value(value),
            Ok(Outcome::Blocked) => {
                self.stats.blocked_calls.fetch_add(1, Ordering::Relaxed);
                SyscallReturn::Blocked
            }
            Err(err) => {
                self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                log::trace!("thread {} {} failed: {}", tid, entry.name, err);
                SyscallReturn::Value(to_register(Err(err)))
            }
        }
    }

    /// Register value for a woken thread's blocked call
    ///
    /// Returns `None` while the thread has no wake-up result yet.
    pub fn resume(&self, kernel: &KernelState, tid: ThreadId) -> Option<isize> {
        let wakeup = kernel.take_wakeup(tid)?;
        let copy = self.pending.lock().remove(&tid);
        let result = wakeup.and_then(|done| match (&done, copy) {
            (Completion::Unit, _) => Ok(OK),
            (Completion::Connected(conid), _) => Ok(conid.0 as isize),
            (_, Some(copy)) => {
                let pid = Self::caller_pid(kernel, tid)?;
                Self::finish_copy_out(kernel, pid, copy, &done)
            }
            (_, None) => Err(KernError::IllegalArgs),
        });
        Some(to_register(result))
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message::SenderInfo;

    #[test]
    fn test_table_layout() {
        let table = SyscallTable::new();
        assert_eq!(table.count(), SYSCALL_COUNT);
        assert_eq!(table.get(SYS_SEND).unwrap().name, "send");
        assert!(table.get(SYS_RECEIVE).unwrap().blocking);
        assert!(!table.get(SYS_CHANNEL_CLOSE).unwrap().blocking);
        assert!(table.get(SYSCALL_COUNT).is_none());
    }

    #[test]
    fn test_syscall_args() {
        let args = SyscallArgs::with_args(&[1, 2, usize::MAX]);
        assert_eq!(args.arg(0), 1);
        assert_eq!(args.arg(5), 0);
        assert_eq!(args.arg(9), 0);
        assert_eq!(args.arg_timeout(2), Timeout::INFINITY);
        assert_eq!(args.arg_timeout(1), Timeout::from_nanos(2));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut words = [0u64; SEND_MSG_WORDS];
        words[2] = 9;
        assert_eq!(decode_message(&words), Err(KernError::IllegalArgs));
        assert_eq!(decode_message(&words[..4]), Err(KernError::IllegalArgs));
    }

    #[test]
    fn test_signal_message_layout() {
        let info = SignalInfo {
            pid: ProcessId(3),
            tid: ThreadId(4),
            signo: 9,
            code: -2,
            value: 77,
        };
        let words = encode_message(UserBuffer::empty(), SystemMessage::Signal(info));
        let decoded = decode_message(&words).unwrap();
        assert_eq!(decoded.sys, SystemMessage::Signal(info));
    }

    #[test]
    fn test_received_layout() {
        let msg = ReceivedMessage {
            data: UserBuffer::new(0x4000, 12),
            sys: SystemMessage::None,
            sender: SenderInfo {
                pid: ProcessId(2),
                tid: ThreadId(5),
                connection: ConnectionId(1),
            },
            reply: Some(ConnectionId(6)),
        };
        let words = encode_received(&msg);
        assert_eq!(&words[..2], &[0x4000, 12]);
        assert_eq!(&words[8..], &[2, 5, 1, 6]);
        assert_eq!(bytes_to_words(&words_to_bytes(&words)), words.to_vec());
    }
}
