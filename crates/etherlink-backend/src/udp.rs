//! Ethernet frames carried in UDP datagrams between emulator instances on one broadcast domain.

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use etherlink_frame::{Frame, MacAddr, ETH_HEADER_LEN, ETH_MAX_FRAME_LEN};

use crate::error::{OpenError, RecvError, SendError};
use crate::{BackendKind, EtherBackend};

/// Leading octets of every tunnel hardware address; the remaining four are the peer's IPv4
/// address.
pub const TUNNEL_MAC_PREFIX: [u8; 2] = *b"B2";

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

pub fn tunnel_mac(ip: Ipv4Addr) -> MacAddr {
    let [a, b, c, d] = ip.octets();
    MacAddr::new([TUNNEL_MAC_PREFIX[0], TUNNEL_MAC_PREFIX[1], a, b, c, d])
}

fn tunnel_peer(mac: MacAddr) -> Option<Ipv4Addr> {
    let octets = mac.octets();
    (octets[..2] == TUNNEL_MAC_PREFIX)
        .then(|| Ipv4Addr::new(octets[2], octets[3], octets[4], octets[5]))
}

#[derive(Debug)]
pub struct UdpTunnel {
    socket: UdpSocket,
    port: u16,
    mac: MacAddr,
}

impl UdpTunnel {
    /// Bind the tunnel socket on `port` (0 picks an ephemeral port).
    ///
    /// Without an explicit `local_ip` the address of the interface carrying the default route is
    /// used, falling back to loopback.
    pub fn open(port: u16, local_ip: Option<Ipv4Addr>) -> Result<Self, OpenError> {
        let udp_err = |source| OpenError::Udp { port, source };
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(udp_err)?;
        socket.set_broadcast(true).map_err(udp_err)?;
        let port = socket.local_addr().map_err(udp_err)?.port();

        let local_ip = local_ip
            .or_else(|| outbound_ipv4().ok())
            .unwrap_or(Ipv4Addr::LOCALHOST);
        let mac = tunnel_mac(local_ip);
        tracing::debug!(port, %local_ip, %mac, "UDP tunnel open");

        Ok(Self { socket, port, mac })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Local address the host would use for off-link traffic. No packet is sent.
fn outbound_ipv4() -> io::Result<Ipv4Addr> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    probe.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
    match probe.local_addr()?.ip() {
        std::net::IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        _ => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no IPv4 route",
        )),
    }
}

impl EtherBackend for UdpTunnel {
    fn kind(&self) -> BackendKind {
        BackendKind::UdpSocketTunnel
    }

    fn hardware_address(&self) -> MacAddr {
        self.mac
    }

    fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        if frame.len() > ETH_MAX_FRAME_LEN {
            return Err(SendError::TooLong {
                len: frame.len(),
                max: ETH_MAX_FRAME_LEN,
            });
        }
        let Some(destination) = MacAddr::from_slice(frame.get(..6).unwrap_or_default()) else {
            return Ok(());
        };
        let peer = if destination.is_group() {
            Ipv4Addr::BROADCAST
        } else if let Some(ip) = tunnel_peer(destination) {
            ip
        } else {
            tracing::trace!(%destination, "no tunnel peer for destination, dropped");
            return Ok(());
        };
        self.socket
            .send_to(frame, SocketAddrV4::new(peer, self.port))
            .map(drop)
            .map_err(SendError::from_io)
    }

    fn receive_blocking(&self, timeout: Duration) -> Result<Option<Frame>, RecvError> {
        self.socket
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        let mut buf = vec![0u8; ETH_MAX_FRAME_LEN];
        let (len, from) = match self.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(None)
            }
            Err(err) => return Err(err.into()),
        };
        buf.truncate(len);
        if len < ETH_HEADER_LEN {
            tracing::trace!(%from, len, "short datagram discarded");
            return Ok(None);
        }
        // Our own broadcasts come back to us.
        if buf[6..12] == self.mac.octets() {
            return Ok(None);
        }
        Ok(Some(Frame::from_vec(buf)))
    }
}
