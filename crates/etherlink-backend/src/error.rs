use std::io;
use std::path::PathBuf;

use etherlink_broker::{BrokerError, ConnectError};
use etherlink_frame::MacAddr;

use crate::script::ScriptError;

/// Failure to bring up a backend. Nothing acquired before the failure survives it.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("no ethernet device configured")]
    NoDevice,

    #[error("cannot open {}: {source}", .path.display())]
    Device {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot attach to host interface {interface}: {source}")]
    Attach {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot create tun/tap interface: {0}")]
    TunSetup(#[source] io::Error),

    #[error("tun/tap configuration script {} not found", .0.display())]
    ScriptMissing(PathBuf),

    #[error("tun/tap configuration failed: {0}")]
    Script(#[from] ScriptError),

    #[error("cannot switch {what} to non-blocking I/O: {source}")]
    NonBlocking {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("user-mode networking selected but no user-mode stack is available")]
    NoUserModeStack,

    #[error("cannot create user-mode stack queues: {0}")]
    Queue(#[source] io::Error),

    #[error("cannot connect to broker: {0}")]
    Broker(#[from] ConnectError),

    #[error("cannot open UDP tunnel on port {port}: {source}")]
    Udp {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not supported on this host")]
    Unsupported(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    TooLong { len: usize, max: usize },

    /// The transport's transmit queue is full; the frame was not sent.
    #[error("transmit buffer full")]
    Congestion,

    #[error("transmit failed: {0}")]
    Io(#[source] io::Error),

    #[error("publish failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("backend is closed")]
    Closed,
}

impl SendError {
    pub(crate) fn from_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::ENOBUFS) {
            SendError::Congestion
        } else {
            SendError::Io(err)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecvError {
    #[error("receive failed: {0}")]
    Io(#[from] io::Error),

    #[error("broker receive failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("backend is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum MulticastError {
    #[error("cannot {action} multicast address {addr}: {source}")]
    Request {
        action: &'static str,
        addr: MacAddr,
        #[source]
        source: io::Error,
    },
}
