//! Connections - client handles to channels
//!
//! A connection is owned by the client process and points at its target
//! channel through a counted reference. Client connections go through
//! PENDING while the server negotiates; reply connections are created by
//! the kernel on delivery and are consumed by their first send.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::error::{KernError, KernResult};
use crate::ipc::channel::{ChannelFlags, ChannelObject, ConnectionInfo, Negotiation};
use crate::kern::process::Process;
use crate::kern::thread::{BlockObject, BlockType, Completion, Pending, Thread};
use crate::kernel::KernelState;
use crate::types::{ChannelId, ChannelRef, ConnectionId, Priority, ProcessId, Syscall, ThreadId, Timeout};

/// Connection flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Made by `open_connection`
    Client,
    /// Made by the kernel for the receiver of a message with a reply route
    Reply,
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress
    Pending,
    Established,
    /// Target channel went away
    Closed,
}

/// How `open_connection` names its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget<'a> {
    Path(&'a str),
    Channel(ChannelRef),
}

/// A client's handle to a channel
#[derive(Debug)]
pub struct Connection {
    pub kind: ConnectionKind,
    pub state: ConnectionState,
    pub target: Arc<ChannelObject>,
    /// Channel of the owning process replies are routed to
    pub reply_channel: Option<ChannelId>,
    /// Thread a reply connection delivers to
    pub reply_to: Option<ThreadId>,
}

impl Connection {
    fn client(target: Arc<ChannelObject>, reply_channel: Option<ChannelId>) -> Self {
        Self {
            kind: ConnectionKind::Client,
            state: ConnectionState::Pending,
            target,
            reply_channel,
            reply_to: None,
        }
    }

    fn reply(target: Arc<ChannelObject>, client: ThreadId) -> Self {
        Self {
            kind: ConnectionKind::Reply,
            state: ConnectionState::Established,
            target,
            reply_channel: None,
            reply_to: Some(client),
        }
    }
}

/// Shared, individually locked connection
pub type ConnectionHandle = Arc<Mutex<Connection>>;

/// A client's connection waiting on a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConnect {
    pub pid: ProcessId,
    pub connection: ConnectionId,
}

// ============================================================================
// Connection Table
// ============================================================================

/// Per-process map of connection id to connection
#[derive(Debug)]
pub struct ConnectionTable {
    slots: BTreeMap<ConnectionId, ConnectionHandle>,
    next_id: u32,
    limit: usize,
}

impl ConnectionTable {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            next_id: 1,
            limit,
        }
    }

    fn insert(&mut self, connection: Connection) -> KernResult<ConnectionId> {
        if self.slots.len() >= self.limit {
            return Err(KernError::NoMemory);
        }
        let conid = ConnectionId(self.next_id);
        self.next_id = self.next_id.checked_add(1).ok_or(KernError::NoMemory)?;
        self.slots.insert(conid, Arc::new(Mutex::new(connection)));
        Ok(conid)
    }

    pub fn get(&self, conid: ConnectionId) -> Option<ConnectionHandle> {
        self.slots.get(&conid).cloned()
    }

    fn remove(&mut self, conid: ConnectionId) -> Option<ConnectionHandle> {
        self.slots.remove(&conid)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.slots.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ============================================================================
// Connection Manager
// ============================================================================

impl KernelState {
    /// Find the channel a connection request names
    fn resolve_target(&self, target: ConnectTarget<'_>) -> KernResult<Arc<ChannelObject>> {
        let channel = match target {
            ConnectTarget::Path(path) => self.names.lock().lookup(path),
            ConnectTarget::Channel(channel) => Some(channel),
        }
        .ok_or(KernError::NoConnection)?;
        self.process(channel.pid)
            .and_then(|process| process.channel(channel.chid))
            .ok_or(KernError::NoConnection)
    }

    /// Connect the calling thread's process to a channel
    ///
    /// Blocks until the server completes the handshake unless the channel
    /// is AUTO_CONNECT. A failed attempt leaves no connection slot behind.
    pub fn open_connection(
        &self,
        tid: ThreadId,
        target: ConnectTarget<'_>,
        timeout: Timeout,
        reply_channel: Option<ChannelId>,
    ) -> KernResult<Syscall<ConnectionId>> {
        let (process, priority) = self.caller(tid)?;
        if let Some(chid) = reply_channel {
            if process.channel(chid).is_none() {
                return Err(KernError::AccessDenied);
            }
        }
        let object = self.resolve_target(target)?;

        let conid = process
            .connections
            .lock()
            .insert(Connection::client(object.clone(), reply_channel))?;
        object.add_ref();

        let result = self.request_connection(&process, tid, priority, &object, conid, timeout);
        match &result {
            Ok(Syscall::Complete(_)) => {
                log::debug!("connection {}:{} established to {}", process.pid, conid, object.id())
            }
            Ok(Syscall::Blocked) => {}
            Err(err) => {
                self.discard_pending_connection(PendingConnect {
                    pid: process.pid,
                    connection: conid,
                });
                log::debug!("connection attempt from {} failed: {}", process.pid, err);
            }
        }
        result
    }

    fn request_connection(
        &self,
        process: &Process,
        tid: ThreadId,
        priority: Priority,
        object: &Arc<ChannelObject>,
        conid: ConnectionId,
        timeout: Timeout,
    ) -> KernResult<Syscall<ConnectionId>> {
        let mut chan = object.lock();
        if chan.closed {
            return Err(KernError::NoConnection);
        }
        if object.exhausted(&chan) {
            return Err(KernError::Dead);
        }
        if object.flags().contains(ChannelFlags::AUTO_CONNECT) {
            if let Some(handle) = process.connection(conid) {
                handle.lock().state = ConnectionState::Established;
            }
            chan.connections += 1;
            chan.ever_connected = true;
            return Ok(Syscall::Complete(conid));
        }
        if timeout.is_poll() {
            return Err(KernError::Timeout);
        }

        let mut table = self.sched.threads();
        if let Some(thread) = table.get_mut(tid) {
            thread.pending = Some(Pending::Connect(PendingConnect {
                pid: process.pid,
                connection: conid,
            }));
        }
        self.sched.block(
            &mut table,
            tid,
            BlockType::Connect,
            BlockObject::Channel(object.clone()),
            timeout,
        );
        match chan.connect_waiters.pop() {
            Some(server) => {
                chan.negotiating.push(Negotiation {
                    server,
                    client: Some(tid),
                });
                let info = ConnectionInfo {
                    pid: process.pid,
                    tid,
                    connection: conid,
                };
                self.sched.wake(&mut table, server, Ok(Completion::Request(info)));
            }
            None => chan.connect_requests.push(tid, priority),
        }
        Ok(Syscall::Blocked)
    }

    /// Mark a negotiated connection established, optionally retargeted
    ///
    /// Called with the old and (for a redirect) new target channel locked.
    pub(crate) fn establish(&self, req: &PendingConnect, retarget: Option<&Arc<ChannelObject>>) -> bool {
        let Some(handle) = self
            .process(req.pid)
            .and_then(|process| process.connection(req.connection))
        else {
            return false;
        };
        let mut conn = handle.lock();
        if let Some(target) = retarget {
            target.add_ref();
            let old = core::mem::replace(&mut conn.target, target.clone());
            old.release_ref();
        }
        conn.state = ConnectionState::Established;
        true
    }

    /// Drop a connection slot that never got established
    pub(crate) fn discard_pending_connection(&self, req: PendingConnect) {
        let Some(process) = self.process(req.pid) else {
            return;
        };
        let removed = process.connections.lock().remove(req.connection);
        if let Some(handle) = removed {
            let mut conn = handle.lock();
            conn.state = ConnectionState::Closed;
            conn.target.release_ref();
        }
    }

    /// Create a one-shot reply connection in `owner` bound to `client`
    pub(crate) fn open_reply_connection(
        &self,
        owner: ProcessId,
        route: &Arc<ChannelObject>,
        client: ThreadId,
    ) -> KernResult<ConnectionId> {
        let process = self.process(owner).ok_or(KernError::NoConnection)?;
        let conid = process
            .connections
            .lock()
            .insert(Connection::reply(route.clone(), client))?;
        route.add_ref();
        Ok(conid)
    }

    /// Remove a reply connection after its one delivery
    pub(crate) fn retire_reply_connection(&self, pid: ProcessId, conid: ConnectionId) {
        let Some(process) = self.process(pid) else {
            return;
        };
        let removed = process.connections.lock().remove(conid);
        if let Some(handle) = removed {
            let mut conn = handle.lock();
            conn.state = ConnectionState::Closed;
            conn.target.release_ref();
        }
    }

    /// Close a connection owned by `pid`
    ///
    /// Senders of this process blocked on it fail with NO_CONNECTION. When
    /// it was the last client connection of an AUTO_CLOSE channel, the
    /// channel is closed too.
    pub fn close_connection(&self, pid: ProcessId, conid: ConnectionId) -> KernResult<()> {
        let process = self.process(pid).ok_or(KernError::AccessDenied)?;
        let handle = process.connection(conid).ok_or(KernError::AccessDenied)?;
        let (target, kind, established) = {
            let mut conn = handle.lock();
            if conn.state == ConnectionState::Pending {
                return Err(KernError::Busy);
            }
            let established = conn.state == ConnectionState::Established;
            conn.state = ConnectionState::Closed;
            (conn.target.clone(), conn.kind, established)
        };
        process.connections.lock().remove(conid);

        let cascade = {
            let mut chan = target.lock();
            let mut table = self.sched.threads();
            let stranded = chan.senders.drain_where(|t| {
                table
                    .get(t)
                    .and_then(Thread::pending_send)
                    .is_some_and(|s| s.sender.pid == pid && s.sender.connection == conid)
            });
            for tid in stranded {
                if let Some(thread) = table.get_mut(tid) {
                    thread.pending = None;
                }
                self.sched.wake(&mut table, tid, Err(KernError::NoConnection));
            }
            drop(table);

            if kind == ConnectionKind::Client && established && !chan.closed {
                chan.connections = chan.connections.saturating_sub(1);
                chan.connections == 0 && target.flags().contains(ChannelFlags::AUTO_CLOSE)
            } else {
                false
            }
        };
        target.release_ref();
        log::debug!("connection {}:{} closed", pid, conid);

        if cascade {
            if let Some(owner) = self.process(target.owner()) {
                if let Err(err) = self.destroy_channel(&owner.channels, &target) {
                    log::warn!(
                        "auto-close of channel {}:{} failed: {}",
                        target.owner(),
                        target.id(),
                        err
                    );
                }
            }
        }
        Ok(())
    }
}
