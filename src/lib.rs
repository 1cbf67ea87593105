//! Chan_R - channel/connection rendezvous IPC for an embedded ARM microkernel
//!
//! This crate provides the kernel core: processes, threads, a priority
//! scheduler with timeouts, and QNX-style message passing between server
//! channels and client connections. All state lives in an explicit
//! [`KernelState`]; blocking calls park the calling thread and report
//! [`Syscall::Blocked`], and the final result is collected from the
//! thread's wake-up slot once a rendezvous, a close or a timeout retires
//! the block.

#![cfg_attr(not(test), no_std)]
// Kernel types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]
// Register-sized casts are explicit at the syscall boundary
#![allow(clippy::unnecessary_cast)]

extern crate alloc;

// Core types
pub mod error;
pub mod types;

pub mod config;
pub mod console;
pub mod ipc;
pub mod kern;
pub mod kernel;
pub mod syscall;
pub mod vm;

pub use config::KernelConfig;
pub use error::{KernError, KernResult};
pub use kernel::KernelState;
pub use types::{ChannelId, ConnectionId, ProcessId, Syscall, ThreadId, Timeout};

/// Kernel version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Kernel name
pub const NAME: &str = "Chan_R";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(NAME, "Chan_R");
        assert!(!VERSION.is_empty());
    }
}
