use std::fs::File;
use std::os::fd::AsFd;
use std::path::Path;
use std::time::Duration;

use etherlink_frame::{Frame, LinkPadding, MacAddr};

use crate::device;
use crate::error::{MulticastError, OpenError, RecvError, SendError};
use crate::{sys, BackendKind, EtherBackend};

pub const SHEEP_NET_DEVICE: &str = "/dev/sheep_net";

/// The `sheep_net` packet driver bound to a host interface.
#[derive(Debug)]
pub struct RawLinkDevice {
    file: File,
    interface: String,
    mac: MacAddr,
}

impl RawLinkDevice {
    pub fn open(interface: &str) -> Result<Self, OpenError> {
        let file = device::open_rw(Path::new(SHEEP_NET_DEVICE))?;
        sys::sheep_net_attach(file.as_fd(), interface).map_err(|source| OpenError::Attach {
            interface: interface.to_owned(),
            source,
        })?;
        device::set_nonblocking(&file, SHEEP_NET_DEVICE)?;

        let mac = sys::sheep_net_hw_addr(file.as_fd()).unwrap_or_else(|err| {
            tracing::warn!(interface, "cannot read hardware address: {err}");
            MacAddr::default()
        });
        tracing::debug!(interface, %mac, "attached to host interface");

        Ok(Self {
            file,
            interface: interface.to_owned(),
            mac,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn multicast(&self, add: bool, addr: MacAddr) -> Result<(), MulticastError> {
        sys::multicast(self.file.as_fd(), add, addr).map_err(|source| MulticastError::Request {
            action: if add { "add" } else { "remove" },
            addr,
            source,
        })
    }
}

impl EtherBackend for RawLinkDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::RawLinkDevice
    }

    fn hardware_address(&self) -> MacAddr {
        self.mac
    }

    fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        device::write_frame(&self.file, LinkPadding::None, frame)
    }

    fn receive_blocking(&self, timeout: Duration) -> Result<Option<Frame>, RecvError> {
        Ok(device::read_frame(&self.file, LinkPadding::None, timeout)?)
    }

    fn enable_multicast(&self, addr: MacAddr) -> Result<(), MulticastError> {
        self.multicast(true, addr)
    }

    fn disable_multicast(&self, addr: MacAddr) -> Result<(), MulticastError> {
        self.multicast(false, addr)
    }
}
