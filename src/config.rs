//! Tunnel configuration
//!
//! Built once at startup and shared read-only with every session; there is no
//! mutable global state.

use std::{
    fmt::{self, Display},
    net::{IpAddr, SocketAddr},
};

use crate::relay::socks5::Address;

/// Address of the upstream SOCKS5 proxy
///
/// IP literals skip DNS entirely; domain names are resolved per session.
#[derive(Clone, Debug)]
pub enum ServerAddr {
    /// IP Address
    SocketAddr(SocketAddr),
    /// Domain name address, resolved at connect time
    DomainName(String, u16),
}

impl ServerAddr {
    /// Builds from a raw host string and port
    pub fn from_parts(host: &str, port: u16) -> ServerAddr {
        match host.parse::<IpAddr>() {
            Ok(ip) => ServerAddr::SocketAddr(SocketAddr::new(ip, port)),
            Err(..) => ServerAddr::DomainName(host.to_owned(), port),
        }
    }

    /// Get host reference
    pub fn host(&self) -> String {
        match *self {
            ServerAddr::SocketAddr(ref addr) => addr.ip().to_string(),
            ServerAddr::DomainName(ref domain, ..) => domain.clone(),
        }
    }

    /// Get port
    pub fn port(&self) -> u16 {
        match *self {
            ServerAddr::SocketAddr(ref addr) => addr.port(),
            ServerAddr::DomainName(.., port) => port,
        }
    }
}

impl Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ServerAddr::SocketAddr(ref addr) => write!(f, "{addr}"),
            ServerAddr::DomainName(ref domain, port) => write!(f, "{domain}:{port}"),
        }
    }
}

/// Process-wide configuration, immutable once the service starts
#[derive(Clone, Debug)]
pub struct Config {
    /// Local listen port, shared by the v4 and v6 acceptors
    pub local_port: u16,
    /// Upstream SOCKS5 proxy
    pub server: ServerAddr,
    /// Fixed target every tunnel asks the proxy to CONNECT to
    pub forward: Address,
}

impl Config {
    /// Creates a configuration
    pub fn new(local_port: u16, server: ServerAddr, forward: Address) -> Config {
        Config {
            local_port,
            server,
            forward,
        }
    }

    /// Validates the required fields
    ///
    /// Every missing or invalid field is collected into one error message,
    /// so the user sees the whole list at once.
    pub fn check_integrity(&self) -> Result<(), String> {
        let mut errors = Vec::new();

        if self.local_port == 0 {
            errors.push("missing <port>");
        }
        if self.server.host().is_empty() {
            errors.push("missing <socks5_host>");
        }
        if self.server.port() == 0 {
            errors.push("missing <socks5_port>");
        }
        if self.forward.port() == 0 {
            errors.push("missing <http_port>");
        }
        if let Address::DomainNameAddress(ref domain, _) = self.forward {
            // a domain name must fit the SOCKS5 length prefix
            if domain.is_empty() || domain.len() > u8::MAX as usize {
                errors.push("invalid <http_host>");
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }
}

/// Parses the forward target host
///
/// IPv4 and IPv6 literals become socket addresses; anything else is kept as a
/// domain name for the proxy to resolve. Whether the result is actually
/// usable is decided by [`Config::check_integrity`].
pub fn parse_forward_addr(host: &str, port: u16) -> Address {
    match host.parse::<IpAddr>() {
        Ok(ip) => Address::SocketAddress(SocketAddr::new(ip, port)),
        Err(..) => Address::DomainNameAddress(host.to_owned(), port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_addr_variants() {
        match parse_forward_addr("127.0.0.1", 80) {
            Address::SocketAddress(addr) => assert!(addr.is_ipv4()),
            other => panic!("unexpected {other:?}"),
        }

        match parse_forward_addr("::1", 8080) {
            Address::SocketAddress(addr) => assert!(addr.is_ipv6()),
            other => panic!("unexpected {other:?}"),
        }

        match parse_forward_addr("example.com", 443) {
            Address::DomainNameAddress(domain, 443) => assert_eq!(domain, "example.com"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn check_integrity_accepts_complete_config() {
        let config = Config::new(
            8000,
            ServerAddr::from_parts("proxy.example.org", 1080),
            parse_forward_addr("example.com", 443),
        );
        config.check_integrity().unwrap();
    }

    #[test]
    fn check_integrity_collects_every_failure() {
        let config = Config::new(0, ServerAddr::from_parts("", 0), parse_forward_addr("", 0));

        let err = config.check_integrity().unwrap_err();
        for field in [
            "missing <port>",
            "missing <socks5_host>",
            "missing <socks5_port>",
            "missing <http_port>",
            "invalid <http_host>",
        ] {
            assert!(err.contains(field), "missing diagnostic {field:?} in {err:?}");
        }
    }

    #[test]
    fn check_integrity_rejects_oversized_domain() {
        let host = "a".repeat(256);
        let config = Config::new(8000, ServerAddr::from_parts("127.0.0.1", 1080), parse_forward_addr(&host, 80));
        config.check_integrity().unwrap_err();
    }
}
