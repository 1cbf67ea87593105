//! Common types used across Chan_R
//!
//! This module defines shared identifier and time types to avoid circular
//! dependencies between the kern and ipc subsystems.

use core::fmt;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier (stable index into the thread table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel identifier, unique within the owning process only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection identifier, unique within the owning process only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified channel reference: owning process plus process-local id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelRef {
    pub pid: ProcessId,
    pub chid: ChannelId,
}

impl ChannelRef {
    pub const fn new(pid: ProcessId, chid: ChannelId) -> Self {
        Self { pid, chid }
    }
}

/// Thread priority (higher is more important)
pub type Priority = u8;

/// Monotonic time in nanoseconds
pub type Nanos = u64;

/// Relative timeout for a blocking call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timeout(pub Nanos);

impl Timeout {
    /// Do not wait at all: fail with a timeout if the call cannot complete now
    pub const POLL: Self = Self(0);
    /// Wait without bound
    pub const INFINITY: Self = Self(u64::MAX);

    pub const fn from_nanos(ns: Nanos) -> Self {
        Self(ns)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    pub fn is_poll(self) -> bool {
        self.0 == 0
    }

    pub fn is_infinite(self) -> bool {
        self == Self::INFINITY
    }

    /// Absolute deadline for this timeout, or `None` when unbounded
    pub fn deadline(self, now: Nanos) -> Option<Nanos> {
        if self.is_infinite() {
            None
        } else {
            Some(now.saturating_add(self.0))
        }
    }
}

/// Result of a call that may park the calling thread
///
/// `Blocked` means the thread is now BLOCKED and off the run queue; its
/// final result lands in its wake-up slot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Syscall<T> {
    Complete(T),
    Blocked,
}

impl<T> Syscall<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Syscall::Blocked)
    }

    /// The completed value, if the call did not block
    pub fn complete(self) -> Option<T> {
        match self {
            Syscall::Complete(value) => Some(value),
            Syscall::Blocked => None,
        }
    }
}
