//! Deadline-bound TLS handshake and certificate identity matching
//!
//! The handshake is driven one non-blocking step at a time: OpenSSL reports
//! WANT_READ/WANT_WRITE, we wait on socket readiness with the time remaining
//! until the handshake deadline, and resume. After completion the peer
//! certificate identity is matched against the dialed host name (never the
//! resolved IP).

use std::net::{Ipv4Addr, Shutdown, TcpStream};
use std::os::fd::AsRawFd;

use openssl::ssl::{ErrorCode, HandshakeError, Ssl, SslStream};
use openssl::x509::X509Ref;
use tracing::debug;

use super::TlsConfig;
use crate::deadline::{self, Deadline, DeadlineError, Direction};
use crate::error::{Cause, Error};

/// Wrap a connected stream in a TLS session.
///
/// `host` is the dialed host name (SNI and identity check); `server` is the
/// rendered address used in error reports. The stream must already be in
/// non-blocking mode. On any failure the socket is shut down before the
/// error is returned.
pub(crate) fn handshake(
    stream: TcpStream,
    host: &str,
    server: &str,
    config: &TlsConfig,
    deadline: Deadline,
) -> Result<SslStream<TcpStream>, Error> {
    let fd = stream.as_raw_fd();

    let ssl = match client_ssl(config, host) {
        Ok(ssl) => ssl,
        Err(e) => {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(failure(server, Cause::Tls(e.to_string())));
        }
    };

    let mut mid = match ssl.connect(stream) {
        Ok(stream) => return verify_identity(stream, host, server, config),
        Err(HandshakeError::WouldBlock(mid)) => mid,
        Err(e) => return Err(handshake_failure(server, e)),
    };

    loop {
        let direction = match mid.error().code() {
            ErrorCode::WANT_READ => Direction::Read,
            ErrorCode::WANT_WRITE => Direction::Write,
            _ => {
                let message = mid.error().to_string();
                let _ = mid.get_ref().shutdown(Shutdown::Both);
                return Err(failure(server, Cause::Tls(message)));
            }
        };

        if let Err(e) = deadline::wait_ready(fd, direction, deadline) {
            let _ = mid.get_ref().shutdown(Shutdown::Both);
            return Err(match e {
                DeadlineError::Elapsed => Error::ConnectionTimeout {
                    server: server.to_string(),
                },
                DeadlineError::Io(e) => failure(server, Cause::Io(e)),
            });
        }

        match mid.handshake() {
            Ok(stream) => return verify_identity(stream, host, server, config),
            Err(HandshakeError::WouldBlock(next)) => mid = next,
            Err(e) => return Err(handshake_failure(server, e)),
        }
    }
}

fn client_ssl(config: &TlsConfig, host: &str) -> Result<Ssl, openssl::error::ErrorStack> {
    let mut ssl = Ssl::new(&config.ctx)?;
    let sni = config.servername.as_deref().unwrap_or(host);
    ssl.set_hostname(sni)?;
    Ok(ssl)
}

fn failure(server: &str, cause: Cause) -> Error {
    Error::ConnectionFailure {
        server: server.to_string(),
        cause,
    }
}

fn handshake_failure(server: &str, e: HandshakeError<TcpStream>) -> Error {
    let message = match &e {
        HandshakeError::Failure(mid) | HandshakeError::WouldBlock(mid) => {
            let _ = mid.get_ref().shutdown(Shutdown::Both);
            mid.error().to_string()
        }
        HandshakeError::SetupFailure(stack) => stack.to_string(),
    };
    failure(server, Cause::Tls(message))
}

/// Match the negotiated peer certificate against the dialed host name and
/// close the connection on mismatch.
fn verify_identity(
    stream: SslStream<TcpStream>,
    host: &str,
    server: &str,
    config: &TlsConfig,
) -> Result<SslStream<TcpStream>, Error> {
    if !config.verify_hostname {
        return Ok(stream);
    }

    let expected = config.servername.as_deref().unwrap_or(host);

    let mismatch = match stream.ssl().peer_certificate() {
        None => Some("<no peer certificate>".to_string()),
        Some(cert) => match cert_matches_host(&cert, expected) {
            Ok(()) => None,
            Err(actual) => Some(actual),
        },
    };

    if let Some(actual) = mismatch {
        debug!(server, expected, %actual, "closing connection on certificate identity mismatch");
        let _ = stream.get_ref().shutdown(Shutdown::Both);
        return Err(failure(
            server,
            Cause::HostnameMismatch {
                expected: expected.to_string(),
                actual,
            },
        ));
    }

    Ok(stream)
}

/// Check a certificate's subject identity against a host name.
///
/// SAN DNS entries are matched with leftmost-label wildcard support; SAN IP
/// entries are matched when the host is an IPv4 literal. The subject CN is
/// only consulted when the certificate carries no SAN extension. On mismatch
/// the certificate's identities are returned for the error report.
pub(crate) fn cert_matches_host(cert: &X509Ref, host: &str) -> Result<(), String> {
    let mut names = Vec::new();
    let ip_literal = host.parse::<Ipv4Addr>().ok();

    if let Some(sans) = cert.subject_alt_names() {
        for san in &sans {
            if let Some(dns) = san.dnsname() {
                if host_matches_pattern(dns, host) {
                    return Ok(());
                }
                names.push(dns.to_string());
            } else if let Some(ip) = san.ipaddress() {
                if let (Some(literal), [a, b, c, d]) = (ip_literal, ip) {
                    if literal.octets() == [*a, *b, *c, *d] {
                        return Ok(());
                    }
                }
                if ip.len() == 4 {
                    names.push(format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]));
                }
            }
        }
    } else {
        // No SAN extension; fall back to the subject CN.
        for entry in cert
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        {
            if let Some(cn) = valid_cn(entry.data().as_slice()) {
                if host_matches_pattern(cn, host) {
                    return Ok(());
                }
                names.push(cn.to_string());
            }
        }
    }

    if names.is_empty() {
        names.push("<no subject identity>".to_string());
    }
    Err(names.join(", "))
}

/// A subject CN is only usable as an identity when its raw bytes are clean
/// UTF-8 with no interior NUL; a NUL would otherwise let
/// `db.example\0evil.example` read as `db.example`.
fn valid_cn(bytes: &[u8]) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(cn) if !cn.contains('\0') => Some(cn),
        _ => None,
    }
}

/// Case-insensitive host match with single leftmost-label wildcard support:
/// `*.example.com` matches `a.example.com` but not `example.com` or
/// `a.b.example.com`.
fn host_matches_pattern(pattern: &str, host: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        }
    } else {
        pattern.eq_ignore_ascii_case(host)
    }
}
