//! Message rendezvous - send / receive hand-off
//!
//! A send meets a receive on the target channel: whichever side arrives
//! second completes the pair under the channel lock and wakes the other.
//! Delivery is all-or-nothing: a shared-memory grant is mapped into the
//! receiving process, and a reply connection created there, before either
//! thread sees a result; if any step fails the earlier ones are undone.
//!
//! Replies travel on one-shot reply connections. A reply connection points
//! at the client's reply channel and carries the client thread id, so the
//! reply is handed only to that thread and the connection is dropped after
//! its single delivery.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{KernError, KernResult};
use crate::ipc::channel::{ChannelObject, QueuedMessage};
use crate::ipc::connection::{ConnectionKind, ConnectionState, PendingConnect};
use crate::ipc::message::{Message, ReceivedMessage, SendFlags, SenderInfo, SharedRegion, SystemMessage};
use crate::kern::thread::{BlockObject, BlockType, Completion, Pending, Thread};
use crate::kernel::KernelState;
use crate::types::{ChannelId, ConnectionId, ProcessId, Syscall, ThreadId, Timeout};

/// A send parked on a channel, kept in the sender's thread record
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub message: Message,
    pub sender: SenderInfo,
    pub flags: SendFlags,
    /// Client reply channel the receiver gets a reply connection to
    pub reply_route: Option<Arc<ChannelObject>>,
    /// Receiver restriction for replies
    pub deliver_to: Option<ThreadId>,
    /// Sent over a reply connection, which is consumed by the delivery
    pub one_shot: bool,
}

impl PendingSend {
    fn eligible(&self, receiver: ThreadId) -> bool {
        self.deliver_to.map_or(true, |dest| dest == receiver)
    }
}

impl KernelState {
    /// Carry out the hand-off side effects for a message bound for `owner`
    ///
    /// Maps any shared region, then creates the reply connection. Undoes the
    /// mapping if the reply connection cannot be made.
    fn deliver(&self, owner: ProcessId, pending: &PendingSend) -> KernResult<ReceivedMessage> {
        let sys = match pending.message.sys {
            SystemMessage::ShareMemory(region) => {
                let addr = self.vm().share(
                    pending.sender.pid,
                    region.addr,
                    region.size,
                    owner,
                    region.attrs,
                )?;
                SystemMessage::ShareMemory(SharedRegion { addr, ..region })
            }
            other => other,
        };

        let reply = match &pending.reply_route {
            Some(route) => match self.open_reply_connection(owner, route, pending.sender.tid) {
                Ok(conid) => Some(conid),
                Err(err) => {
                    if let SystemMessage::ShareMemory(region) = sys {
                        self.vm().unshare(owner, region.addr, region.size);
                    }
                    return Err(err);
                }
            },
            None => None,
        };

        Ok(ReceivedMessage {
            data: pending.message.data,
            sys,
            sender: pending.sender,
            reply,
        })
    }

    /// Send `msg` on connection `conid` of the calling thread's process
    ///
    /// Returns as soon as a receiver has taken the message; the reply, if
    /// any, is collected with `receive` on the connection's reply channel.
    /// With ASYNC the message is queued when nobody is receiving.
    pub fn send(
        &self,
        tid: ThreadId,
        conid: ConnectionId,
        msg: Message,
        timeout: Timeout,
        flags: SendFlags,
    ) -> KernResult<Syscall<()>> {
        let (process, priority) = self.caller(tid)?;
        let handle = process.connection(conid).ok_or(KernError::AccessDenied)?;
        let (target, kind, reply_channel, reply_to) = {
            let conn = handle.lock();
            match conn.state {
                ConnectionState::Pending => return Err(KernError::Busy),
                ConnectionState::Closed => return Err(KernError::NoConnection),
                ConnectionState::Established => {}
            }
            (conn.target.clone(), conn.kind, conn.reply_channel, conn.reply_to)
        };
        if msg.data.len > target.capacity() {
            return Err(KernError::IllegalArgs);
        }

        let flags = if flags.contains(SendFlags::ASYNC) {
            flags | SendFlags::NO_REPLY
        } else {
            flags
        };
        let one_shot = kind == ConnectionKind::Reply;
        let reply_route = match reply_channel {
            Some(chid) if !flags.contains(SendFlags::NO_REPLY) && !one_shot => process.channel(chid),
            _ => None,
        };
        let pending = PendingSend {
            message: msg,
            sender: SenderInfo {
                pid: process.pid,
                tid,
                connection: conid,
            },
            flags,
            reply_route,
            deliver_to: reply_to,
            one_shot,
        };

        let mut chan = target.lock();
        if chan.closed {
            handle.lock().state = ConnectionState::Closed;
            return Err(KernError::NoConnection);
        }
        if handle.lock().state != ConnectionState::Established {
            return Err(KernError::NoConnection);
        }
        if let Some(dest) = reply_to {
            if !self.sched.threads().is_alive(dest) {
                return Err(KernError::Dead);
            }
        }

        let receiver = chan.receivers.iter().find(|t| pending.eligible(*t));
        if let Some(receiver) = receiver {
            let received = self.deliver(target.owner(), &pending)?;
            chan.receivers.remove(receiver);
            {
                let mut table = self.sched.threads();
                self.sched
                    .wake(&mut table, receiver, Ok(Completion::Message(received)));
            }
            drop(chan);
            if one_shot {
                self.retire_reply_connection(process.pid, conid);
            }
            log::trace!("send {}:{} handed to thread {}", process.pid, conid, receiver);
            return Ok(Syscall::Complete(()));
        }

        if flags.contains(SendFlags::ASYNC) {
            if chan.mailbox.len() >= self.config().async_queue_depth {
                return Err(KernError::Busy);
            }
            let received = self.deliver(target.owner(), &pending)?;
            chan.mailbox.push_back(QueuedMessage {
                message: received,
                deliver_to: reply_to,
            });
            drop(chan);
            if one_shot {
                self.retire_reply_connection(process.pid, conid);
            }
            log::trace!("send {}:{} queued", process.pid, conid);
            return Ok(Syscall::Complete(()));
        }

        if timeout.is_poll() {
            return Err(KernError::Timeout);
        }
        let mut table = self.sched.threads();
        if let Some(thread) = table.get_mut(tid) {
            thread.pending = Some(Pending::Send(pending));
        }
        chan.senders.push(tid, priority);
        self.sched.block(
            &mut table,
            tid,
            BlockType::Send,
            BlockObject::Channel(target.clone()),
            timeout,
        );
        Ok(Syscall::Blocked)
    }

    /// Receive the next message on channel `chid` of the calling thread's process
    ///
    /// The mailbox is drained first, then blocked senders in priority order.
    pub fn receive(
        &self,
        tid: ThreadId,
        chid: ChannelId,
        timeout: Timeout,
    ) -> KernResult<Syscall<ReceivedMessage>> {
        let (process, priority) = self.caller(tid)?;
        let object = process.channel(chid).ok_or(KernError::AccessDenied)?;

        let mut chan = object.lock();
        if chan.closed {
            return Err(KernError::NoConnection);
        }

        let queued = chan
            .mailbox
            .iter()
            .position(|q| q.deliver_to.map_or(true, |dest| dest == tid));
        if let Some(queued) = queued.and_then(|pos| chan.mailbox.remove(pos)) {
            return Ok(Syscall::Complete(queued.message));
        }

        let mut table = self.sched.threads();
        loop {
            let sender = chan.senders.pop_where(|t| {
                table
                    .get(t)
                    .and_then(Thread::pending_send)
                    .is_some_and(|s| s.eligible(tid))
            });
            let Some(sender) = sender else {
                break;
            };
            let Some(pending) = table.get_mut(sender).and_then(Thread::take_pending_send) else {
                continue;
            };
            match self.deliver(object.owner(), &pending) {
                Ok(received) => {
                    self.sched.wake(&mut table, sender, Ok(Completion::Unit));
                    drop(table);
                    drop(chan);
                    if pending.one_shot {
                        self.retire_reply_connection(pending.sender.pid, pending.sender.connection);
                    }
                    log::trace!("receive {}:{} took from thread {}", process.pid, chid, sender);
                    return Ok(Syscall::Complete(received));
                }
                Err(err) => {
                    log::debug!("delivery from thread {} failed: {}", sender, err);
                    self.sched.wake(&mut table, sender, Err(err));
                }
            }
        }

        if timeout.is_poll() {
            return Err(KernError::Timeout);
        }
        chan.receivers.push(tid, priority);
        self.sched.block(
            &mut table,
            tid,
            BlockType::Receive,
            BlockObject::Channel(object.clone()),
            timeout,
        );
        Ok(Syscall::Blocked)
    }

    /// Fail or drop everything on `object` that waits for `tid` specifically
    ///
    /// Negotiations the thread holds as server are failed with
    /// NO_CONNECTION; replies addressed to it fail with DEAD.
    pub(crate) fn release_thread_from_channel(
        &self,
        object: &Arc<ChannelObject>,
        tid: ThreadId,
    ) -> Vec<PendingConnect> {
        let mut discard = Vec::new();
        let mut chan = object.lock();
        let mut table = self.sched.threads();

        let mut held = Vec::new();
        chan.negotiating.retain(|n| {
            if n.server == tid {
                held.push(*n);
                false
            } else {
                true
            }
        });
        for client in held.into_iter().filter_map(|n| n.client) {
            if let Some(req) = table.get_mut(client).and_then(Thread::take_pending_connect) {
                discard.push(req);
            }
            self.sched.wake(&mut table, client, Err(KernError::NoConnection));
        }

        let orphaned = chan.senders.drain_where(|t| {
            table
                .get(t)
                .and_then(Thread::pending_send)
                .is_some_and(|s| s.deliver_to == Some(tid))
        });
        for sender in orphaned {
            if let Some(thread) = table.get_mut(sender) {
                thread.pending = None;
            }
            self.sched.wake(&mut table, sender, Err(KernError::Dead));
        }
        drop(table);

        let owner = object.owner();
        chan.mailbox.retain(|q| {
            if q.deliver_to != Some(tid) {
                return true;
            }
            if let SystemMessage::ShareMemory(region) = q.message.sys {
                self.vm().unshare(owner, region.addr, region.size);
            }
            false
        });
        discard
    }
}
