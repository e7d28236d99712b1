//! Kernel tap devices: legacy ethertap (`/dev/tapN`) and the tun/tap clone device.

use std::fs::File;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use etherlink_frame::{Frame, LinkPadding, MacAddr};

use crate::device;
use crate::error::{MulticastError, OpenError, RecvError, SendError};
use crate::report::{Severity, WarningSink};
use crate::script::{NetworkScript, ScriptAction};
use crate::{sys, BackendKind, EtherBackend};

pub const TUN_CLONE_DEVICE: &str = "/dev/net/tun";
const TAP_NAME_TEMPLATE: &str = "tun%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapMode {
    Ethertap,
    TunTap,
}

/// Padding convention of ethertap devices on this host.
pub const fn ethertap_padding() -> LinkPadding {
    if cfg!(target_os = "linux") {
        LinkPadding::LeadingPad2
    } else {
        LinkPadding::None
    }
}

pub struct KernelTap {
    file: File,
    mode: TapMode,
    padding: LinkPadding,
    mac: MacAddr,
    interface: String,
    script: Option<NetworkScript>,
    warnings: Option<Arc<dyn WarningSink>>,
    closed: AtomicBool,
}

impl KernelTap {
    /// Open `/dev/<device>` for a `tapN` selector.
    pub fn open_ethertap(device: &str) -> Result<Self, OpenError> {
        let path = PathBuf::from("/dev").join(device);
        let file = device::open_rw(&path)?;
        device::set_nonblocking(&file, "ethertap device")?;
        tracing::debug!(device, "ethertap device open");
        Ok(Self {
            file,
            mode: TapMode::Ethertap,
            padding: ethertap_padding(),
            mac: MacAddr::from_host_tag(std::process::id()),
            interface: device.to_owned(),
            script: None,
            warnings: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Create a tap interface through the clone device and bring it up with `script`.
    pub fn open_tuntap(script: &Path, warnings: Arc<dyn WarningSink>) -> Result<Self, OpenError> {
        if !cfg!(target_os = "linux") {
            return Err(OpenError::Unsupported("tun/tap networking"));
        }
        let file = device::open_rw(Path::new(TUN_CLONE_DEVICE))?;
        let interface =
            sys::tun_set_iff(file.as_fd(), TAP_NAME_TEMPLATE).map_err(OpenError::TunSetup)?;

        if !script.exists() {
            return Err(OpenError::ScriptMissing(script.to_path_buf()));
        }
        let script = NetworkScript::new(script, interface.clone());
        script.run(ScriptAction::Up)?;

        // From here on the interface is configured; dropping `tap` runs the down script.
        let tap = Self {
            file,
            mode: TapMode::TunTap,
            padding: LinkPadding::None,
            mac: MacAddr::from_host_tag(std::process::id()),
            interface,
            script: Some(script),
            warnings: Some(warnings),
            closed: AtomicBool::new(false),
        };
        device::set_nonblocking(&tap.file, TUN_CLONE_DEVICE)?;
        tracing::info!(interface = %tap.interface, "tap interface up");
        Ok(tap)
    }

    pub fn mode(&self) -> TapMode {
        self.mode
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl EtherBackend for KernelTap {
    fn kind(&self) -> BackendKind {
        BackendKind::KernelTunTap
    }

    fn hardware_address(&self) -> MacAddr {
        self.mac
    }

    fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        device::write_frame(&self.file, self.padding, frame)
    }

    fn receive_blocking(&self, timeout: Duration) -> Result<Option<Frame>, RecvError> {
        Ok(device::read_frame(&self.file, self.padding, timeout)?)
    }

    fn enable_multicast(&self, addr: MacAddr) -> Result<(), MulticastError> {
        if self.mode == TapMode::Ethertap {
            // Devices that cannot filter multicast still deliver it.
            if let Err(err) = sys::multicast(self.file.as_fd(), true, addr) {
                tracing::debug!(%addr, "ethertap multicast add ignored: {err}");
            }
        }
        Ok(())
    }

    fn disable_multicast(&self, addr: MacAddr) -> Result<(), MulticastError> {
        match self.mode {
            TapMode::Ethertap => sys::multicast(self.file.as_fd(), false, addr).map_err(|source| {
                MulticastError::Request {
                    action: "remove",
                    addr,
                    source,
                }
            }),
            TapMode::TunTap => Ok(()),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(script) = &self.script {
            if let Err(err) = script.run(ScriptAction::Down) {
                let message = format!("cannot bring down {}: {err}", script.interface());
                match &self.warnings {
                    Some(warnings) => warnings.report(Severity::Warning, &message),
                    None => tracing::warn!("{message}"),
                }
            }
        }
    }
}

impl Drop for KernelTap {
    fn drop(&mut self) {
        self.close();
    }
}
