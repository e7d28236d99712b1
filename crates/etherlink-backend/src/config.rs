//! Adapter configuration and backend selection.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::BackendKind;

pub const DEFAULT_TUN_CONFIG_SCRIPT: &str = "/usr/local/share/etherlink/tunconfig";
pub const DEFAULT_UDP_PORT: u16 = 6066;

/// Already-parsed networking preferences.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EtherConfig {
    /// Selector: a raw interface name, `tap*`, `tun`, `slirp` or an `amqp`/`amqps` URL.
    pub device: Option<String>,
    pub disabled: bool,
    pub config_script: Option<PathBuf>,
    /// `[tcp|udp]:hostport:guestaddr:guestport` rules for the user-mode stack.
    pub redirects: Vec<String>,
    pub udp_tunnel: bool,
    pub udp_port: u16,
    pub udp_local_ip: Option<Ipv4Addr>,
    pub broker_identity: Option<String>,
    pub stack_timeout: bool,
}

impl Default for EtherConfig {
    fn default() -> Self {
        Self {
            device: None,
            disabled: false,
            config_script: None,
            redirects: Vec::new(),
            udp_tunnel: false,
            udp_port: DEFAULT_UDP_PORT,
            udp_local_ip: None,
            broker_identity: None,
            stack_timeout: true,
        }
    }
}

impl EtherConfig {
    pub fn with_device(device: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            ..Self::default()
        }
    }

    /// The backend to open, or `None` when networking is off.
    pub fn selector(&self) -> Option<BackendSelector> {
        if self.disabled {
            return None;
        }
        if self.udp_tunnel {
            return Some(BackendSelector::UdpTunnel {
                port: self.udp_port,
            });
        }
        match self.device.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(device) => Some(BackendSelector::parse(device)),
        }
    }

    pub fn script_path(&self) -> PathBuf {
        self.config_script
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TUN_CONFIG_SCRIPT))
    }

    /// Routing key used to recognize this instance's own broker messages.
    pub fn broker_identity(&self) -> String {
        match &self.broker_identity {
            Some(identity) if !identity.is_empty() => identity.clone(),
            _ => instance_tag(),
        }
    }
}

fn instance_tag() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos() ^ (elapsed.as_secs() as u32))
        .unwrap_or_default();
    format!("etherlink-{:08x}{:08x}", std::process::id(), nanos)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelector {
    RawLink { interface: String },
    Ethertap { device: String },
    TunTap,
    UserMode,
    Broker { url: String },
    UdpTunnel { port: u16 },
}

impl BackendSelector {
    pub fn parse(device: &str) -> Self {
        if device.starts_with("tap") {
            BackendSelector::Ethertap {
                device: device.to_owned(),
            }
        } else if device == "tun" {
            BackendSelector::TunTap
        } else if device == "slirp" {
            BackendSelector::UserMode
        } else if device.starts_with("amqp") {
            BackendSelector::Broker {
                url: device.to_owned(),
            }
        } else {
            BackendSelector::RawLink {
                interface: device.to_owned(),
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSelector::RawLink { .. } => BackendKind::RawLinkDevice,
            BackendSelector::Ethertap { .. } | BackendSelector::TunTap => BackendKind::KernelTunTap,
            BackendSelector::UserMode => BackendKind::UserModeStack,
            BackendSelector::Broker { .. } => BackendKind::BrokerTunnel,
            BackendSelector::UdpTunnel { .. } => BackendKind::UdpSocketTunnel,
        }
    }
}
