//! Host → guest port forwarding rules: `[tcp|udp]:hostport:guestaddr:guestport`.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Guest address assumed when a rule leaves it empty.
pub const DEFAULT_GUEST_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for RedirectProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RedirectProtocol::Tcp => "tcp",
            RedirectProtocol::Udp => "udp",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RedirectRule {
    pub protocol: RedirectProtocol,
    pub host_port: u16,
    pub guest_addr: Ipv4Addr,
    pub guest_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedirectError {
    #[error("unknown protocol {0:?}")]
    Protocol(String),
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("invalid port {0:?}")]
    Port(String),
    #[error("invalid guest address {0:?}")]
    GuestAddr(String),
}

impl FromStr for RedirectRule {
    type Err = RedirectError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let mut fields = rule.splitn(4, ':');
        let protocol = match fields.next().unwrap_or_default() {
            "" | "tcp" => RedirectProtocol::Tcp,
            "udp" => RedirectProtocol::Udp,
            other => return Err(RedirectError::Protocol(other.to_owned())),
        };
        let host_port = parse_port(fields.next().ok_or(RedirectError::MissingField("host port"))?)?;
        let guest_addr = match fields
            .next()
            .ok_or(RedirectError::MissingField("guest address"))?
        {
            "" => DEFAULT_GUEST_ADDR,
            addr => addr
                .parse()
                .map_err(|_| RedirectError::GuestAddr(addr.to_owned()))?,
        };
        let guest_port =
            parse_port(fields.next().ok_or(RedirectError::MissingField("guest port"))?)?;
        Ok(Self {
            protocol,
            host_port,
            guest_addr,
            guest_port,
        })
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.protocol, self.host_port, self.guest_addr, self.guest_port
        )
    }
}

/// Port in `1..=65535`, written in decimal, `0x` hex or leading-`0` octal.
fn parse_port(text: &str) -> Result<u16, RedirectError> {
    let invalid = || RedirectError::Port(text.to_owned());
    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };
    let port = u32::from_str_radix(digits, radix).map_err(|_| invalid())?;
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(invalid()),
    }
}
