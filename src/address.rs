//! Server address parsing and resolution
//!
//! A `"host:port"` string resolves into one or more concrete [`Address`]
//! records; a host name with several DNS answers expands into one record per
//! answer, in resolver order. Resolution failures name the offending server
//! string rather than surfacing as a bare DNS error.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};

use crate::error::{Cause, Error, Result};

/// One concrete connect target: the host name as supplied by the caller,
/// the numeric IPv4 address it resolved to, and the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    host: String,
    ip: Ipv4Addr,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, ip: Ipv4Addr, port: u16) -> Self {
        Address {
            host: host.into(),
            ip,
            port,
        }
    }

    /// The host name as dialed (used for SNI and certificate identity)
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The numeric endpoint to connect to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, self.port))
    }
}

impl fmt::Display for Address {
    /// Rendered as `host[ip]:port` for diagnostics
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]:{}", self.host, self.ip, self.port)
    }
}

/// Split a `"host:port"` server string. Fails fast on a missing host,
/// missing port, or a port outside 1-65535.
pub fn parse_server(server: &str) -> Result<(&str, u16)> {
    let (host, port) = server
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidServer(server.to_string()))?;

    let port: u16 = port
        .parse()
        .map_err(|_| Error::InvalidServer(server.to_string()))?;

    if host.is_empty() || port == 0 {
        return Err(Error::InvalidServer(server.to_string()));
    }

    Ok((host, port))
}

/// Resolve a list of server strings into a flat address list.
///
/// Order within one multi-answer host follows the resolver; the overall
/// order follows the server list. Only IPv4 answers are used.
pub fn resolve(servers: &[String]) -> Result<Vec<Address>> {
    let mut addresses = Vec::new();

    for server in servers {
        let (host, port) = parse_server(server)?;

        // IPv4 literals skip the resolver entirely.
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            addresses.push(Address::new(host, ip, port));
            continue;
        }

        let resolved = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::ConnectionFailure {
                server: server.clone(),
                cause: Cause::Io(e),
            })?;

        let before = addresses.len();
        for addr in resolved {
            if let IpAddr::V4(ip) = addr.ip() {
                addresses.push(Address::new(host, ip, port));
            }
        }

        if addresses.len() == before {
            return Err(Error::ConnectionFailure {
                server: server.clone(),
                cause: Cause::Other(format!("no IPv4 address for host {:?}", host)),
            });
        }
    }

    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server() {
        assert_eq!(parse_server("db.example:5170").unwrap(), ("db.example", 5170));
        assert_eq!(parse_server("10.0.0.1:80").unwrap(), ("10.0.0.1", 80));
    }

    #[test]
    fn test_parse_server_rejects_missing_port() {
        assert!(matches!(
            parse_server("db.example"),
            Err(Error::InvalidServer(_))
        ));
    }

    #[test]
    fn test_parse_server_rejects_bad_port() {
        assert!(parse_server("db.example:0").is_err());
        assert!(parse_server("db.example:-1").is_err());
        assert!(parse_server("db.example:http").is_err());
        assert!(parse_server(":5170").is_err());
    }

    #[test]
    fn test_resolve_ipv4_literal() {
        let addrs = resolve(&["127.0.0.1:1999".to_string()]).unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].ip(), Ipv4Addr::LOCALHOST);
        assert_eq!(addrs[0].port(), 1999);
        assert_eq!(addrs[0].host(), "127.0.0.1");
    }

    #[test]
    fn test_resolve_localhost_name() {
        let addrs = resolve(&["localhost:1999".to_string()]).unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.port() == 1999));
        assert!(addrs.iter().all(|a| a.host() == "localhost"));
    }

    #[test]
    fn test_resolve_preserves_server_order() {
        let addrs = resolve(&[
            "127.0.0.2:1001".to_string(),
            "127.0.0.1:1002".to_string(),
        ])
        .unwrap();
        assert_eq!(addrs[0].socket_addr(), "127.0.0.2:1001".parse().unwrap());
        assert_eq!(addrs[1].socket_addr(), "127.0.0.1:1002".parse().unwrap());
    }

    #[test]
    fn test_display_format() {
        let addr = Address::new("db.example", Ipv4Addr::new(10, 1, 2, 3), 5170);
        assert_eq!(addr.to_string(), "db.example[10.1.2.3]:5170");
    }

    #[test]
    fn test_resolution_failure_names_the_server() {
        let err = resolve(&["no-such-host.invalid:80".to_string()]).unwrap_err();
        match err {
            Error::ConnectionFailure { server, .. } => {
                assert_eq!(server, "no-such-host.invalid:80");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
