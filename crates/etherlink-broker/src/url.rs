//! Lenient parser for broker URLs of the shape
//! `amqp[s]://user:password@host:port/vhost?exchange`.
//!
//! Every segment is optional. A segment that is missing, empty or malformed (for example a
//! non-numeric port) falls back to its default instead of failing the whole parse; only the
//! connection attempt itself can reject a URL.

use core::fmt;

pub const DEFAULT_USER: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_VHOST: &str = "/";
pub const DEFAULT_EXCHANGE: &str = "appleshare";
pub const DEFAULT_PLAIN_PORT: u16 = 5672;
pub const DEFAULT_TLS_PORT: u16 = 5671;

#[derive(Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub tls: bool,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub exchange: String,
}

impl BrokerUrl {
    /// Defaults for a plaintext (`tls == false`) or TLS connection.
    pub fn defaults(tls: bool) -> Self {
        Self {
            tls,
            user: DEFAULT_USER.to_owned(),
            password: DEFAULT_PASSWORD.to_owned(),
            host: DEFAULT_HOST.to_owned(),
            port: if tls {
                DEFAULT_TLS_PORT
            } else {
                DEFAULT_PLAIN_PORT
            },
            vhost: DEFAULT_VHOST.to_owned(),
            exchange: DEFAULT_EXCHANGE.to_owned(),
        }
    }

    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        let tls = input
            .get(..5)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("amqps"));
        let mut url = Self::defaults(tls);

        let Some((_, rest)) = input.split_once("://") else {
            return url;
        };

        let (rest, exchange) = match rest.split_once('?') {
            Some((rest, exchange)) => (rest, Some(exchange)),
            None => (rest, None),
        };
        if let Some(exchange) = exchange.filter(|e| !e.is_empty()) {
            url.exchange = exchange.to_owned();
        }

        let (authority, vhost) = match rest.split_once('/') {
            Some((authority, vhost)) => (authority, Some(vhost)),
            None => (rest, None),
        };
        if let Some(vhost) = vhost.filter(|v| !v.is_empty()) {
            url.vhost = vhost.to_owned();
        }

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, authority),
        };
        if let Some(userinfo) = userinfo {
            let (user, password) = match userinfo.split_once(':') {
                Some((user, password)) => (user, Some(password)),
                None => (userinfo, None),
            };
            if !user.is_empty() {
                url.user = user.to_owned();
            }
            if let Some(password) = password.filter(|p| !p.is_empty()) {
                url.password = password.to_owned();
            }
        }

        let (host, port) = split_host_port(hostport);
        if !host.is_empty() {
            url.host = host.to_owned();
        }
        if let Some(port) = port
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|&p| p != 0)
        {
            url.port = port;
        }

        url
    }
}

fn split_host_port(hostport: &str) -> (&str, Option<&str>) {
    // Bracketed IPv6 literal: `[::1]:5672`.
    if let Some(inner) = hostport.strip_prefix('[') {
        if let Some((host, rest)) = inner.split_once(']') {
            return (host, rest.strip_prefix(':'));
        }
    }
    match hostport.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (hostport, None),
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "amqps" } else { "amqp" };
        write!(
            f,
            "{scheme}://{}@{}:{}/{}?{}",
            self.user,
            self.host,
            self.port,
            self.vhost.trim_start_matches('/'),
            self.exchange
        )
    }
}

impl fmt::Debug for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerUrl")
            .field("tls", &self.tls)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vhost", &self.vhost)
            .field("exchange", &self.exchange)
            .finish()
    }
}
