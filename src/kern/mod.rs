//! Kernel core - threads, scheduling, timers and processes
//!
//! The IPC subsystem sits on top of these: every blocking IPC call parks
//! its thread through [`sched::Scheduler::block`] and is retired either by
//! a rendezvous or by a timer event.

pub mod process;
pub mod sched;
pub mod thread;
pub mod timer;
pub mod waitq;

pub use process::{Process, ProcessTable};
pub use sched::Scheduler;
pub use thread::{BlockType, Completion, ThreadState, Wakeup};
pub use timer::EventHandle;
