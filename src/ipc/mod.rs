//! Channel/connection inter-process communication
//!
//! Servers own channels, clients own connections to them, and messages
//! move by rendezvous: a send and a receive on the same channel meet and
//! the payload descriptor passes from one thread to the other without a
//! copy.

pub mod channel;
pub mod connection;
pub mod message;
pub mod rendezvous;
pub mod signal;

pub use channel::{ChannelFlags, ChannelKind, ChannelName, ConnectCommand, ConnectionInfo};
pub use connection::{ConnectTarget, ConnectionKind, ConnectionState};
pub use message::{
    Message, ReceivedMessage, SendFlags, SenderInfo, SharedRegion, SignalInfo, SystemMessage,
    UserBuffer,
};
pub use signal::signal_path;
