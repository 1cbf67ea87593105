//! Channels - server-owned IPC endpoints
//!
//! A channel lives in its owner's channel table and, when PUBLIC, in the
//! system-wide name registry. Connections hold a counted reference to the
//! channel object, so a closed channel whose connections are still open is
//! unlinked but kept "retired": its id is not handed out again until the
//! last reference goes away.
//!
//! Everything a thread can wait for on a channel is queued here: connection
//! requests, servers waiting for them, handshakes in negotiation, receivers,
//! blocked senders and the asynchronous mailbox.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use bitflags::bitflags;
use spin::{Mutex, MutexGuard};

use crate::error::{KernError, KernResult};
use crate::ipc::message::{ReceivedMessage, SystemMessage};
use crate::ipc::signal::check_proc_path;
use crate::kern::thread::{BlockObject, BlockType, Completion, Thread, ThreadTable};
use crate::kern::waitq::WaitQueue;
use crate::kernel::KernelState;
use crate::types::{ChannelId, ChannelRef, ConnectionId, ProcessId, Syscall, ThreadId, Timeout};

// ============================================================================
// Channel Attributes
// ============================================================================

/// Visibility of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Reachable by id only
    Private,
    /// Registered under a system-wide pathname
    Public,
}

bitflags! {
    /// Channel behavior flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelFlags: u32 {
        /// Connection requests are established without a server handshake
        const AUTO_CONNECT = 1 << 0;
        /// At most one connection is ever established
        const SINGLE_CONNECTION = 1 << 1;
        /// Close the channel when its last client connection closes
        const AUTO_CLOSE = 1 << 2;
    }
}

/// How a new channel is named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelName<'a> {
    /// Fresh process-local id
    Anonymous,
    /// Public pathname
    Path(&'a str),
    /// Well-known process-local id
    Id(ChannelId),
}

/// Server's answer to a connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCommand {
    /// Bind the client to the channel it asked for
    AcceptDirect,
    /// Bind the client to another channel of this process
    RedirectPrivate(ChannelId),
    /// Refuse; the client sees ACCESS_DENIED
    Reject,
}

impl ConnectCommand {
    pub const ACCEPT_DIRECT: u32 = 0;
    pub const REDIRECT_PRIVATE: u32 = 1;
    pub const REJECT: u32 = 2;

    /// Decode the register pair `(cmd, result)`
    pub fn from_raw(cmd: u32, result: u32) -> Option<Self> {
        match cmd {
            Self::ACCEPT_DIRECT => Some(Self::AcceptDirect),
            Self::REDIRECT_PRIVATE => Some(Self::RedirectPrivate(ChannelId(result))),
            Self::REJECT => Some(Self::Reject),
            _ => None,
        }
    }
}

/// A connection request as seen by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Requesting process
    pub pid: ProcessId,
    /// Requesting thread
    pub tid: ThreadId,
    /// The client's pending connection id
    pub connection: ConnectionId,
}

/// A handshake a server thread has taken and not yet completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub server: ThreadId,
    /// `None` once the client gave up (timeout or exit)
    pub client: Option<ThreadId>,
}

/// A message parked in the asynchronous mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message: ReceivedMessage,
    /// Only this thread may receive it (replies)
    pub deliver_to: Option<ThreadId>,
}

// ============================================================================
// Channel Object
// ============================================================================

/// Mutable channel state, guarded by the channel object lock
#[derive(Debug)]
pub struct Channel {
    pub pathname: Option<String>,
    pub closed: bool,
    /// Clients blocked in `open_connection`, not yet taken by a server
    pub connect_requests: WaitQueue,
    /// Servers blocked in `channel_connection_wait`
    pub connect_waiters: WaitQueue,
    pub negotiating: Vec<Negotiation>,
    pub receivers: WaitQueue,
    pub senders: WaitQueue,
    pub mailbox: VecDeque<QueuedMessage>,
    /// Established client connections
    pub connections: usize,
    pub ever_connected: bool,
}

impl Channel {
    fn new(pathname: Option<String>) -> Self {
        Self {
            pathname,
            closed: false,
            connect_requests: WaitQueue::new(),
            connect_waiters: WaitQueue::new(),
            negotiating: Vec::new(),
            receivers: WaitQueue::new(),
            senders: WaitQueue::new(),
            mailbox: VecDeque::new(),
            connections: 0,
            ever_connected: false,
        }
    }

    /// Drop `tid` from whichever queue its block of `kind` put it on
    pub(crate) fn forget_waiter(&mut self, tid: ThreadId, kind: BlockType) {
        match kind {
            BlockType::Connect => {
                if !self.connect_requests.remove(tid) {
                    for negotiation in self.negotiating.iter_mut() {
                        if negotiation.client == Some(tid) {
                            negotiation.client = None;
                        }
                    }
                }
            }
            BlockType::ConnectWait => {
                self.connect_waiters.remove(tid);
            }
            BlockType::Send => {
                self.senders.remove(tid);
            }
            BlockType::Receive => {
                self.receivers.remove(tid);
            }
            BlockType::Join | BlockType::Syn | BlockType::Sleep => {}
        }
    }
}

/// A channel: immutable attributes, reference count and locked state
#[derive(Debug)]
pub struct ChannelObject {
    owner: ProcessId,
    id: ChannelId,
    kind: ChannelKind,
    flags: ChannelFlags,
    /// Largest user payload accepted by `send`
    capacity: usize,
    /// Connections (pending, established or reply) pointing here
    refs: AtomicUsize,
    inner: Mutex<Channel>,
}

impl ChannelObject {
    pub(crate) fn new(
        owner: ProcessId,
        id: ChannelId,
        kind: ChannelKind,
        flags: ChannelFlags,
        capacity: usize,
        pathname: Option<String>,
    ) -> Self {
        Self {
            owner,
            id,
            kind,
            flags,
            capacity,
            refs: AtomicUsize::new(0),
            inner: Mutex::new(Channel::new(pathname)),
        }
    }

    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn reference(&self) -> ChannelRef {
        ChannelRef::new(self.owner, self.id)
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn flags(&self) -> ChannelFlags {
        self.flags
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lock(&self) -> MutexGuard<'_, Channel> {
        self.inner.lock()
    }

    pub(crate) fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_ref(&self) {
        let _ = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// SINGLE_CONNECTION channel that already had its connection
    pub(crate) fn exhausted(&self, chan: &Channel) -> bool {
        self.flags.contains(ChannelFlags::SINGLE_CONNECTION) && chan.ever_connected
    }
}

// ============================================================================
// Channel Table
// ============================================================================

/// Per-process map of channel id to channel object
#[derive(Debug)]
pub struct ChannelTable {
    slots: BTreeMap<ChannelId, Arc<ChannelObject>>,
    /// Closed channels still referenced by a connection
    retired: BTreeMap<ChannelId, Arc<ChannelObject>>,
    next_id: u32,
    limit: usize,
}

impl ChannelTable {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            retired: BTreeMap::new(),
            next_id: 1,
            limit,
        }
    }

    fn purge_retired(&mut self) {
        self.retired.retain(|_, object| object.refs() > 0);
    }

    /// True while `chid` is open or retired
    pub fn in_use(&mut self, chid: ChannelId) -> bool {
        self.purge_retired();
        self.slots.contains_key(&chid) || self.retired.contains_key(&chid)
    }

    /// Pick the id for a new channel
    fn allocate(&mut self, requested: Option<ChannelId>) -> KernResult<ChannelId> {
        if self.slots.len() >= self.limit {
            return Err(KernError::NoMemory);
        }
        match requested {
            Some(ChannelId(0)) => Err(KernError::IllegalArgs),
            Some(chid) if self.in_use(chid) => Err(KernError::AlreadyExists),
            Some(chid) => Ok(chid),
            None => loop {
                let chid = ChannelId(self.next_id);
                self.next_id = self.next_id.checked_add(1).ok_or(KernError::NoMemory)?;
                if !self.in_use(chid) {
                    break Ok(chid);
                }
            },
        }
    }

    fn insert(&mut self, object: Arc<ChannelObject>) {
        self.slots.insert(object.id(), object);
    }

    pub fn get(&self, chid: ChannelId) -> Option<Arc<ChannelObject>> {
        self.slots.get(&chid).cloned()
    }

    /// Remove a closed channel; keep it retired while referenced
    fn unlink(&mut self, chid: ChannelId) {
        if let Some(object) = self.slots.remove(&chid) {
            if object.refs() > 0 {
                self.retired.insert(chid, object);
            }
        }
        self.purge_retired();
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.slots.keys().copied().collect()
    }

    pub fn objects(&self) -> Vec<Arc<ChannelObject>> {
        self.slots.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ============================================================================
// Name Registry
// ============================================================================

/// System-wide pathname → channel map for PUBLIC channels
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: BTreeMap<String, ChannelRef>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self {
            names: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, path: &str) -> Option<ChannelRef> {
        self.names.get(path).copied()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.names.contains_key(path)
    }

    fn register(&mut self, path: String, channel: ChannelRef) {
        self.names.insert(path, channel);
    }

    /// Remove `path` if it still names `channel`
    fn unregister(&mut self, path: &str, channel: ChannelRef) {
        if self.names.get(path) == Some(&channel) {
            self.names.remove(path);
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ============================================================================
// Channel Manager
// ============================================================================

impl KernelState {
    fn check_path(&self, path: &str) -> KernResult<String> {
        if path.is_empty() || path.len() > self.config().max_pathname_len {
            return Err(KernError::IllegalArgs);
        }
        Ok(String::from(path))
    }

    /// Create a channel owned by the calling thread's process
    pub fn open_channel(
        &self,
        tid: ThreadId,
        kind: ChannelKind,
        name: ChannelName<'_>,
        capacity: usize,
        flags: ChannelFlags,
    ) -> KernResult<ChannelId> {
        let (process, _) = self.caller(tid)?;
        if capacity == 0 || capacity > self.config().max_message_size {
            return Err(KernError::IllegalArgs);
        }
        let (path, requested) = match (kind, name) {
            (ChannelKind::Public, ChannelName::Path(path)) => {
                let path = self.check_path(path)?;
                check_proc_path(process.pid, &path)?;
                (Some(path), None)
            }
            (ChannelKind::Private, ChannelName::Anonymous) => (None, None),
            (ChannelKind::Private, ChannelName::Id(chid)) => (None, Some(chid)),
            _ => return Err(KernError::IllegalArgs),
        };

        let mut names = self.names.lock();
        if let Some(path) = &path {
            if names.contains(path) {
                return Err(KernError::AlreadyExists);
            }
        }
        let object = {
            let mut table = process.channels.lock();
            let chid = table.allocate(requested)?;
            let object = Arc::new(ChannelObject::new(
                process.pid,
                chid,
                kind,
                flags,
                capacity,
                path.clone(),
            ));
            table.insert(object.clone());
            object
        };
        if let Some(path) = path {
            names.register(path, object.reference());
        }
        drop(names);

        log::debug!(
            "channel {}:{} opened ({:?}, {:?}, capacity {})",
            process.pid,
            object.id(),
            kind,
            flags,
            capacity
        );
        Ok(object.id())
    }

    /// Close a channel owned by `pid`
    ///
    /// Fails with BUSY, without blocking, while a connection handshake is
    /// in negotiation on it.
    pub fn close_channel(&self, pid: ProcessId, chid: ChannelId) -> KernResult<()> {
        let process = self.process(pid).ok_or(KernError::AccessDenied)?;
        let object = process.channel(chid).ok_or(KernError::AccessDenied)?;
        self.destroy_channel(&process.channels, &object)
    }

    /// Wake every waiter with NO_CONNECTION, then unlink the channel
    pub(crate) fn destroy_channel(
        &self,
        channels: &Mutex<ChannelTable>,
        object: &Arc<ChannelObject>,
    ) -> KernResult<()> {
        let mut discard = Vec::new();
        let pathname = {
            let mut chan = object.lock();
            if chan.closed {
                return Err(KernError::AccessDenied);
            }
            if !chan.negotiating.is_empty() {
                return Err(KernError::Busy);
            }
            chan.closed = true;

            let mut waiters = chan.receivers.drain();
            waiters.extend(chan.senders.drain());
            waiters.extend(chan.connect_waiters.drain());
            waiters.extend(chan.connect_requests.drain());

            let mut table = self.sched.threads();
            for tid in waiters {
                if let Some(thread) = table.get_mut(tid) {
                    if let Some(req) = thread.take_pending_connect() {
                        discard.push(req);
                    }
                    thread.pending = None;
                }
                self.sched.wake(&mut table, tid, Err(KernError::NoConnection));
            }
            drop(table);

            for queued in chan.mailbox.drain(..) {
                if let SystemMessage::ShareMemory(region) = queued.message.sys {
                    self.vm().unshare(object.owner(), region.addr, region.size);
                }
            }
            chan.pathname.take()
        };

        {
            let mut names = self.names.lock();
            if let Some(path) = &pathname {
                names.unregister(path, object.reference());
            }
            channels.lock().unlink(object.id());
        }
        for req in discard {
            self.discard_pending_connection(req);
        }

        log::debug!("channel {}:{} closed", object.owner(), object.id());
        Ok(())
    }

    /// Take the next connection request on `chid` into negotiation
    pub fn channel_connection_wait(
        &self,
        tid: ThreadId,
        chid: ChannelId,
        timeout: Timeout,
    ) -> KernResult<Syscall<ConnectionInfo>> {
        let (process, priority) = self.caller(tid)?;
        let object = process.channel(chid).ok_or(KernError::AccessDenied)?;

        let mut chan = object.lock();
        if chan.closed {
            return Err(KernError::NoConnection);
        }
        if chan.negotiating.iter().any(|n| n.server == tid) {
            return Err(KernError::Busy);
        }

        let mut table = self.sched.threads();
        while let Some(client) = chan.connect_requests.pop() {
            if let Some(info) = request_info(&table, client) {
                chan.negotiating.push(Negotiation {
                    server: tid,
                    client: Some(client),
                });
                log::trace!("channel {}:{} negotiating with thread {}", process.pid, chid, client);
                return Ok(Syscall::Complete(info));
            }
        }

        if timeout.is_poll() {
            return Err(KernError::Timeout);
        }
        chan.connect_waiters.push(tid, priority);
        self.sched.block(
            &mut table,
            tid,
            BlockType::ConnectWait,
            BlockObject::Channel(object.clone()),
            timeout,
        );
        Ok(Syscall::Blocked)
    }

    /// Finish the handshake the calling thread holds on `chid`
    pub fn channel_connection_complete(
        &self,
        tid: ThreadId,
        chid: ChannelId,
        cmd: ConnectCommand,
    ) -> KernResult<()> {
        let (process, _) = self.caller(tid)?;
        let object = process.channel(chid).ok_or(KernError::AccessDenied)?;
        let redirect = match cmd {
            ConnectCommand::RedirectPrivate(target) if target == chid => {
                return Err(KernError::IllegalArgs)
            }
            ConnectCommand::RedirectPrivate(target) => {
                Some(process.channel(target).ok_or(KernError::IllegalArgs)?)
            }
            _ => None,
        };

        // Two channels of one process are locked in ascending id order
        let (mut chan, mut private) = match &redirect {
            Some(other) if other.id() < chid => {
                let private = other.lock();
                (object.lock(), Some(private))
            }
            Some(other) => {
                let chan = object.lock();
                (chan, Some(other.lock()))
            }
            None => (object.lock(), None),
        };

        let pos = chan
            .negotiating
            .iter()
            .position(|n| n.server == tid)
            .ok_or(KernError::IllegalArgs)?;
        if let (Some(target), Some(target_chan)) = (&redirect, &private) {
            if target_chan.closed || target.exhausted(target_chan) {
                return Err(KernError::IllegalArgs);
            }
        }

        let negotiation = chan.negotiating.remove(pos);
        let Some(client) = negotiation.client else {
            return Err(KernError::Dead);
        };
        let req = self
            .sched
            .threads()
            .get_mut(client)
            .and_then(Thread::take_pending_connect);
        let Some(req) = req else {
            return Err(KernError::Dead);
        };

        let (outcome, reply) = match cmd {
            ConnectCommand::Reject => (Err(KernError::AccessDenied), Ok(())),
            ConnectCommand::AcceptDirect if object.exhausted(&chan) => {
                (Err(KernError::Dead), Err(KernError::Dead))
            }
            ConnectCommand::AcceptDirect => {
                if self.establish(&req, None) {
                    chan.connections += 1;
                    chan.ever_connected = true;
                    (Ok(Completion::Connected(req.connection)), Ok(()))
                } else {
                    (Err(KernError::NoConnection), Err(KernError::Dead))
                }
            }
            ConnectCommand::RedirectPrivate(_) => match (&redirect, private.as_mut()) {
                (Some(target), Some(target_chan)) if self.establish(&req, Some(target)) => {
                    target_chan.connections += 1;
                    target_chan.ever_connected = true;
                    (Ok(Completion::Connected(req.connection)), Ok(()))
                }
                _ => (Err(KernError::NoConnection), Err(KernError::Dead)),
            },
        };

        let failed = outcome.is_err();
        {
            let mut table = self.sched.threads();
            self.sched.wake(&mut table, client, outcome);
        }
        drop(private);
        drop(chan);
        if failed {
            self.discard_pending_connection(req);
        }

        log::debug!(
            "channel {}:{} completed connection {}:{} ({:?})",
            process.pid,
            chid,
            req.pid,
            req.connection,
            cmd
        );
        reply
    }
}

/// Build the server's view of a queued connection request
fn request_info(table: &ThreadTable, client: ThreadId) -> Option<ConnectionInfo> {
    let req = table.get(client)?.pending_connect()?;
    Some(ConnectionInfo {
        pid: req.pid,
        tid: client,
        connection: req.connection,
    })
}
