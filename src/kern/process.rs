//! Processes
//!
//! A process is a protection domain: it owns a channel table and a
//! connection table, and its threads. Ids in both tables are local to the
//! process.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::Mutex;

use crate::error::{KernError, KernResult};
use crate::ipc::channel::{ChannelObject, ChannelTable};
use crate::ipc::connection::{ConnectionHandle, ConnectionTable};
use crate::types::{ChannelId, ConnectionId, ProcessId};

/// Process control block
#[derive(Debug)]
pub struct Process {
    pub pid: ProcessId,
    /// Channels owned by this process (leaf lock)
    pub channels: Mutex<ChannelTable>,
    /// Connections owned by this process (leaf lock)
    pub connections: Mutex<ConnectionTable>,
}

impl Process {
    pub fn new(pid: ProcessId, max_channels: usize, max_connections: usize) -> Self {
        Self {
            pid,
            channels: Mutex::new(ChannelTable::new(max_channels)),
            connections: Mutex::new(ConnectionTable::new(max_connections)),
        }
    }

    /// Look up an open channel of this process
    pub fn channel(&self, chid: ChannelId) -> Option<Arc<ChannelObject>> {
        self.channels.lock().get(chid)
    }

    /// Look up a connection of this process
    pub fn connection(&self, conid: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.lock().get(conid)
    }
}

/// Table of live processes
#[derive(Debug)]
pub struct ProcessTable {
    processes: BTreeMap<ProcessId, Arc<Process>>,
    next_pid: u32,
    limit: usize,
}

impl ProcessTable {
    pub fn new(limit: usize) -> Self {
        Self {
            processes: BTreeMap::new(),
            next_pid: 1,
            limit,
        }
    }

    /// Insert a new process with a fresh pid
    pub fn create(&mut self, max_channels: usize, max_connections: usize) -> KernResult<Arc<Process>> {
        if self.processes.len() >= self.limit {
            return Err(KernError::NoMemory);
        }
        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        let process = Arc::new(Process::new(pid, max_channels, max_connections));
        self.processes.insert(pid, process.clone());
        Ok(process)
    }

    pub fn get(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.processes.get(&pid).cloned()
    }

    pub fn remove(&mut self, pid: ProcessId) -> Option<Arc<Process>> {
        self.processes.remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_ids_not_reused() {
        let mut table = ProcessTable::new(4);
        let a = table.create(4, 4).unwrap().pid;
        table.remove(a);
        let b = table.create(4, 4).unwrap().pid;
        assert_ne!(a, b);
        assert!(table.get(a).is_none());
        assert_eq!(table.get(b).map(|p| p.pid), Some(b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_process_limit() {
        let mut table = ProcessTable::new(1);
        table.create(4, 4).unwrap();
        assert_eq!(table.create(4, 4).err(), Some(KernError::NoMemory));
    }

    #[test]
    fn test_empty_tables() {
        let process = Process::new(ProcessId(3), 2, 2);
        assert!(process.channel(ChannelId(1)).is_none());
        assert!(process.connection(ConnectionId(1)).is_none());
    }
}
