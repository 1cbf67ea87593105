//! Message structures
//!
//! A message is a user payload descriptor plus an optional system part.
//! The payload is handed to the receiver verbatim; only shared-memory grants
//! are acted on by the kernel during delivery.

use bitflags::bitflags;

use crate::types::{ConnectionId, ProcessId, ThreadId};
use crate::vm::MapAttrs;

/// User payload: address and length in the sender's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserBuffer {
    pub addr: usize,
    pub len: usize,
}

impl UserBuffer {
    pub const fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    pub const fn empty() -> Self {
        Self { addr: 0, len: 0 }
    }
}

/// Signal notification carried by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    /// Sending process
    pub pid: ProcessId,
    /// Sending thread
    pub tid: ThreadId,
    pub signo: u32,
    pub code: i32,
    pub value: usize,
}

/// Memory region granted to the receiver
///
/// On the sender side `addr` is in the sender's address space; after
/// delivery it is the address the VM layer chose in the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedRegion {
    pub addr: usize,
    pub size: usize,
    pub attrs: MapAttrs,
}

/// Kernel-interpreted part of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemMessage {
    #[default]
    None,
    Signal(SignalInfo),
    ShareMemory(SharedRegion),
}

/// A message as submitted by a sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Message {
    pub data: UserBuffer,
    pub sys: SystemMessage,
}

impl Message {
    pub const fn new(data: UserBuffer) -> Self {
        Self {
            data,
            sys: SystemMessage::None,
        }
    }

    pub const fn with_system(data: UserBuffer, sys: SystemMessage) -> Self {
        Self { data, sys }
    }
}

bitflags! {
    /// Options for `send`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SendFlags: u32 {
        /// Do not create a reply connection for the receiver
        const NO_REPLY = 1 << 0;
        /// Queue in the channel mailbox instead of blocking; implies NO_REPLY
        const ASYNC = 1 << 1;
    }
}

/// Who sent a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderInfo {
    pub pid: ProcessId,
    pub tid: ThreadId,
    /// The sender's connection the message came through
    pub connection: ConnectionId,
}

/// A message as seen by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub data: UserBuffer,
    pub sys: SystemMessage,
    pub sender: SenderInfo,
    /// Reply connection created in the receiver's process, if any
    pub reply: Option<ConnectionId>,
}

impl ReceivedMessage {
    /// The message without delivery metadata
    pub fn message(&self) -> Message {
        Message {
            data: self.data,
            sys: self.sys,
        }
    }
}
