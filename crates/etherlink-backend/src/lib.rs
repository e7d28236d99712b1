//! Host-side transports for the virtual Ethernet adapter.
//!
//! Every transport implements [`EtherBackend`], a single capability set shared by the guest's
//! transmit path and the background reception pipeline:
//! - [`RawLinkDevice`]: the `sheep_net` packet driver attached to a host interface.
//! - [`KernelTap`]: ethertap (`tapN`) or tun/tap (`tun`) kernel devices.
//! - [`UserModeBackend`]: an embedded user-mode IP stack driven by two bridge threads.
//! - [`BrokerTunnel`]: frames published to / consumed from an AMQP fanout exchange.
//! - [`UdpTunnel`]: frames carried in UDP datagrams between emulator instances.
//!
//! Exactly one backend is opened per adapter lifetime via [`open`].
#![deny(unsafe_code)]

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use etherlink_frame::{Frame, MacAddr};

pub mod broker;
pub mod cancel;
pub mod config;
mod device;
pub mod error;
pub mod loopback;
pub mod raw_link;
pub mod report;
pub mod script;
mod sys;
pub mod tap;
pub mod udp;
pub mod user_mode;

pub use broker::BrokerTunnel;
pub use cancel::CancelFlag;
pub use config::{BackendSelector, EtherConfig};
pub use error::{MulticastError, OpenError, RecvError, SendError};
pub use loopback::LoopbackBackend;
pub use raw_link::RawLinkDevice;
pub use report::{Severity, TracingWarnings, WarningSink};
pub use tap::{KernelTap, TapMode};
pub use udp::UdpTunnel;
pub use user_mode::{
    shared_stack, PollEvents, PollSet, RedirectProtocol, RedirectRule, SharedStack, StackOutput,
    UserModeBackend, UserModeStack,
};

/// Upper bound on a single readiness wait inside [`EtherBackend::receive_blocking`] callers.
///
/// The reception pipeline re-checks its cancellation flag at least this often.
pub const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    RawLinkDevice,
    KernelTunTap,
    UserModeStack,
    BrokerTunnel,
    UdpSocketTunnel,
    /// In-process loopback wire, never selected by configuration.
    Loopback,
}

/// Uniform contract of every host transport.
///
/// `send` and the multicast calls run on the guest's execution context; `receive_blocking` runs
/// on the reception thread. Both may be in progress at the same time, hence `&self` everywhere.
pub trait EtherBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn hardware_address(&self) -> MacAddr;

    /// Transmit one guest → host frame.
    ///
    /// A full transmit queue is reported as [`SendError::Congestion`], which callers count as a
    /// collision rather than treating as fatal.
    fn send(&self, frame: &[u8]) -> Result<(), SendError>;

    /// Wait up to `timeout` for one host → guest frame.
    ///
    /// `Ok(None)` means nothing arrived (or the wait was interrupted). Returned frames are not
    /// length-checked; runts are discarded by the caller. `Err` means the transport is gone and
    /// the caller should stop receiving.
    fn receive_blocking(&self, timeout: Duration) -> Result<Option<Frame>, RecvError>;

    fn enable_multicast(&self, _addr: MacAddr) -> Result<(), MulticastError> {
        Ok(())
    }

    fn disable_multicast(&self, _addr: MacAddr) -> Result<(), MulticastError> {
        Ok(())
    }

    /// Start any helper threads the backend needs while the reception pipeline runs.
    ///
    /// The threads must exit promptly once `cancel` is set. The caller joins them before
    /// calling [`EtherBackend::close`].
    fn spawn_workers(&self, _cancel: &CancelFlag) -> io::Result<Vec<JoinHandle<()>>> {
        Ok(Vec::new())
    }

    /// Release transport resources. Idempotent.
    fn close(&self) {}
}

impl<T: EtherBackend + ?Sized> EtherBackend for Arc<T> {
    fn kind(&self) -> BackendKind {
        <T as EtherBackend>::kind(&**self)
    }

    fn hardware_address(&self) -> MacAddr {
        <T as EtherBackend>::hardware_address(&**self)
    }

    fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        <T as EtherBackend>::send(&**self, frame)
    }

    fn receive_blocking(&self, timeout: Duration) -> Result<Option<Frame>, RecvError> {
        <T as EtherBackend>::receive_blocking(&**self, timeout)
    }

    fn enable_multicast(&self, addr: MacAddr) -> Result<(), MulticastError> {
        <T as EtherBackend>::enable_multicast(&**self, addr)
    }

    fn disable_multicast(&self, addr: MacAddr) -> Result<(), MulticastError> {
        <T as EtherBackend>::disable_multicast(&**self, addr)
    }

    fn spawn_workers(&self, cancel: &CancelFlag) -> io::Result<Vec<JoinHandle<()>>> {
        <T as EtherBackend>::spawn_workers(&**self, cancel)
    }

    fn close(&self) {
        <T as EtherBackend>::close(&**self)
    }
}

/// Host collaborators needed while opening a backend.
pub struct OpenEnv {
    pub warnings: Arc<dyn WarningSink>,
    /// Embedded stack for the `slirp` selector; other selectors ignore it.
    pub user_mode_stack: Option<SharedStack>,
}

impl OpenEnv {
    pub fn new(warnings: Arc<dyn WarningSink>) -> Self {
        Self {
            warnings,
            user_mode_stack: None,
        }
    }
}

/// Open the backend selected by `config`.
///
/// Every resource acquired before a failure is released before the error is returned.
pub fn open(config: &EtherConfig, env: OpenEnv) -> Result<Arc<dyn EtherBackend>, OpenError> {
    let selector = config.selector().ok_or(OpenError::NoDevice)?;
    tracing::debug!(?selector, "opening ethernet backend");

    let backend: Arc<dyn EtherBackend> = match selector {
        BackendSelector::RawLink { interface } => Arc::new(RawLinkDevice::open(&interface)?),
        BackendSelector::Ethertap { device } => Arc::new(KernelTap::open_ethertap(&device)?),
        BackendSelector::TunTap => Arc::new(KernelTap::open_tuntap(
            &config.script_path(),
            env.warnings.clone(),
        )?),
        BackendSelector::UserMode => {
            let stack = env.user_mode_stack.ok_or(OpenError::NoUserModeStack)?;
            Arc::new(UserModeBackend::open(
                stack,
                &config.redirects,
                config.stack_timeout,
                &*env.warnings,
            )?)
        }
        BackendSelector::Broker { url } => {
            let url = etherlink_broker::BrokerUrl::parse(&url);
            Arc::new(BrokerTunnel::connect(
                &url,
                config.broker_identity(),
                env.warnings.clone(),
            )?)
        }
        BackendSelector::UdpTunnel { port } => {
            Arc::new(UdpTunnel::open(port, config.udp_local_ip)?)
        }
    };

    tracing::info!(
        kind = ?backend.kind(),
        mac = %backend.hardware_address(),
        "ethernet backend open"
    );
    Ok(backend)
}
