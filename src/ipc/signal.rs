//! Signal delivery over IPC
//!
//! Every process may open a PUBLIC, AUTO_CONNECT channel at
//! `/proc/<pid>/signal`. Names under `/proc/` are reserved: a process can
//! register only its own signal path there. Sending a signal is a one-way ASYNC message with
//! a `SystemMessage::Signal` part on a transient connection to it.
//! Delivery is best effort: the sender is never blocked and never told
//! whether the signal arrived.

use core::fmt::Write;

use crate::error::{KernError, KernResult};
use crate::ipc::channel::{ChannelFlags, ChannelKind, ChannelName};
use crate::ipc::connection::ConnectTarget;
use crate::ipc::message::{Message, SendFlags, SignalInfo, SystemMessage, UserBuffer};
use crate::kernel::KernelState;
use crate::types::{ChannelId, ProcessId, Syscall, ThreadId, Timeout};

/// Room for `/proc/<u32>/signal`
const SIGNAL_PATH_LEN: usize = 32;

/// Payload capacity of a signal channel
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Per-process namespace
const PROC_PREFIX: &str = "/proc/";

/// Well-known pathname of a process's signal channel
pub fn signal_path(pid: ProcessId) -> heapless::String<SIGNAL_PATH_LEN> {
    let mut path = heapless::String::new();
    // Cannot overflow: the longest pid is 10 digits
    let _ = write!(path, "/proc/{}/signal", pid.0);
    path
}

/// Refuse `/proc/` names other than `pid`'s own signal path
pub(crate) fn check_proc_path(pid: ProcessId, path: &str) -> KernResult<()> {
    if path.starts_with(PROC_PREFIX) && path != signal_path(pid).as_str() {
        return Err(KernError::AccessDenied);
    }
    Ok(())
}

impl KernelState {
    /// Open the calling process's signal channel
    pub fn open_signal_channel(&self, tid: ThreadId) -> KernResult<ChannelId> {
        let (process, _) = self.caller(tid)?;
        let path = signal_path(process.pid);
        self.open_channel(
            tid,
            ChannelKind::Public,
            ChannelName::Path(&path),
            SIGNAL_CHANNEL_CAPACITY,
            ChannelFlags::AUTO_CONNECT,
        )
    }

    /// Post a signal to process `to`
    ///
    /// Only an invalid calling thread is reported. A missing signal channel,
    /// a full mailbox or any other delivery failure is logged and dropped.
    pub fn signal_to_proc(
        &self,
        from: ThreadId,
        to: ProcessId,
        signo: u32,
        code: i32,
        value: usize,
    ) -> KernResult<()> {
        let (process, _) = self.caller(from)?;
        let path = signal_path(to);

        let conid = match self.open_connection(from, ConnectTarget::Path(&path), Timeout::POLL, None) {
            Ok(Syscall::Complete(conid)) => conid,
            Ok(Syscall::Blocked) => return Ok(()),
            Err(err) => {
                log::debug!("signal {} from {} to {} dropped: {}", signo, process.pid, to, err);
                return Ok(());
            }
        };

        let info = SignalInfo {
            pid: process.pid,
            tid: from,
            signo,
            code,
            value,
        };
        let msg = Message::with_system(UserBuffer::empty(), SystemMessage::Signal(info));
        if let Err(err) = self.send(
            from,
            conid,
            msg,
            Timeout::POLL,
            SendFlags::NO_REPLY | SendFlags::ASYNC,
        ) {
            log::debug!("signal {} from {} to {} not sent: {}", signo, process.pid, to, err);
        }
        if let Err(err) = self.close_connection(process.pid, conid) {
            log::debug!("signal connection {}:{} not closed: {}", process.pid, conid, err);
        }
        Ok(())
    }
}
