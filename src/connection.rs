//! One live connection to one resolved address
//!
//! A [`Connection`] exclusively owns its transport handle (an OS socket,
//! optionally wrapped by a TLS session) and exposes the deadline-bound
//! operations built on [`crate::deadline`]. Low-level failures are
//! classified into the crate error taxonomy here; the would-block plumbing
//! for plain and TLS transports lives in the private `Transport` enum.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};

use bytes::{Bytes, BytesMut};
use openssl::ssl::{ErrorCode, SslStream};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::address::Address;
use crate::config::Config;
use crate::deadline::{self, Deadline, DeadlineError, Direction, Op};
use crate::error::{Cause, Error, Result};
use crate::tls;

const READ_CHUNK: usize = 8192;

/// The transport handle: a plain socket or a TLS session over one
#[derive(Debug)]
enum Transport {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
}

impl Transport {
    fn raw_fd(&self) -> RawFd {
        match self {
            Transport::Plain(stream) => stream.as_raw_fd(),
            Transport::Tls(stream) => stream.get_ref().as_raw_fd(),
        }
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            Transport::Tls(stream) => stream.get_ref(),
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Op<usize>> {
        match self {
            Transport::Plain(stream) => map_io(stream.read(buf), Direction::Read),
            Transport::Tls(stream) => match stream.ssl_read(buf) {
                Ok(n) => Ok(Op::Ready(n)),
                Err(e) => map_ssl(e, Direction::Read),
            },
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<Op<usize>> {
        match self {
            Transport::Plain(stream) => map_io(stream.write(buf), Direction::Write),
            Transport::Tls(stream) => match stream.ssl_write(buf) {
                Ok(n) => Ok(Op::Ready(n)),
                Err(e) => map_ssl(e, Direction::Write),
            },
        }
    }
}

fn map_io(result: io::Result<usize>, direction: Direction) -> io::Result<Op<usize>> {
    match result {
        Ok(n) => Ok(Op::Ready(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Op::WouldBlock(direction)),
        Err(e) => Err(e),
    }
}

/// Translate an OpenSSL I/O outcome into the tri-state. A clean close-notify
/// reads as zero bytes; renegotiation can flip the wait direction, which is
/// why the want-codes are honored over the issuing direction.
fn map_ssl(e: openssl::ssl::Error, direction: Direction) -> io::Result<Op<usize>> {
    match e.code() {
        ErrorCode::WANT_READ => Ok(Op::WouldBlock(Direction::Read)),
        ErrorCode::WANT_WRITE => Ok(Op::WouldBlock(Direction::Write)),
        ErrorCode::ZERO_RETURN => Ok(Op::Ready(0)),
        _ => match e.into_io_error() {
            Ok(io_err) if io_err.kind() == io::ErrorKind::WouldBlock => {
                Ok(Op::WouldBlock(direction))
            }
            Ok(io_err) => Err(io_err),
            Err(ssl_err) => Err(io::Error::other(ssl_err.to_string())),
        },
    }
}

/// One live connection, bound to the address it connected to
#[derive(Debug)]
pub struct Connection {
    transport: Transport,
    address: Address,
    open: bool,
}

impl Connection {
    /// Establish a connection to one address under the configured connect
    /// deadline, applying socket options and the optional TLS layer.
    pub(crate) fn connect(address: &Address, config: &Config) -> Result<Connection> {
        let server = address.to_string();

        let socket = new_socket(config).map_err(|e| Error::ConnectionFailure {
            server: server.clone(),
            cause: Cause::Io(e),
        })?;

        let deadline = Deadline::after(config.connect_timeout);
        let target = socket2::SockAddr::from(address.socket_addr());

        let connected = deadline::run(socket.as_raw_fd(), deadline, || {
            match socket.connect(&target) {
                Ok(()) => Ok(Op::Ready(())),
                Err(e) => match e.raw_os_error() {
                    Some(libc::EINPROGRESS) | Some(libc::EALREADY) => {
                        Ok(Op::WouldBlock(Direction::Write))
                    }
                    // The connect completed asynchronously between attempts;
                    // already-connected is success, not an error.
                    Some(libc::EISCONN) => Ok(Op::Ready(())),
                    _ => Err(e),
                },
            }
        });

        match connected {
            Ok(()) => {}
            Err(DeadlineError::Elapsed) => return Err(Error::ConnectionTimeout { server }),
            Err(DeadlineError::Io(e)) => {
                return Err(Error::ConnectionFailure {
                    server,
                    cause: Cause::Io(e),
                })
            }
        }

        let stream: TcpStream = socket.into();

        let transport = match &config.tls {
            None => Transport::Plain(stream),
            Some(tls_config) => {
                let timeout = tls_config
                    .handshake_timeout
                    .unwrap_or(config.connect_timeout);
                let handshake_deadline = Deadline::after(timeout);
                Transport::Tls(tls::session::handshake(
                    stream,
                    address.host(),
                    &server,
                    tls_config,
                    handshake_deadline,
                )?)
            }
        };

        debug!(server = %address, tls = config.tls.is_some(), "connected");

        Ok(Connection {
            transport,
            address: address.clone(),
            open: true,
        })
    }

    /// The address this connection is bound to
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Read exactly `len` bytes. Partial data gathered before a timeout or
    /// EOF is discarded; use [`Connection::read_into`] to retain it.
    pub fn read(&mut self, len: usize, deadline: Deadline) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(len);
        self.read_into(len, &mut buf, deadline)?;
        Ok(buf.freeze())
    }

    /// Read exactly `len` bytes into a caller-supplied buffer.
    ///
    /// On timeout or EOF the bytes gathered so far remain in `out` for
    /// inspection, even though the call fails.
    pub fn read_into(&mut self, len: usize, out: &mut BytesMut, deadline: Deadline) -> Result<()> {
        self.check_open()?;

        let mut remaining = len;
        let mut chunk = [0u8; READ_CHUNK];
        let fd = self.transport.raw_fd();

        while remaining > 0 {
            let want = remaining.min(READ_CHUNK);
            let transport = &mut self.transport;
            let read = deadline::run(fd, deadline, || transport.try_read(&mut chunk[..want]));

            match read {
                Ok(0) => {
                    return Err(Error::ConnectionFailure {
                        server: self.address.to_string(),
                        cause: Cause::UnexpectedEof,
                    })
                }
                Ok(n) => {
                    out.extend_from_slice(&chunk[..n]);
                    remaining -= n;
                }
                Err(DeadlineError::Elapsed) => {
                    return Err(Error::ReadTimeout {
                        server: self.address.to_string(),
                    })
                }
                Err(DeadlineError::Io(e)) => {
                    return Err(Error::ConnectionFailure {
                        server: self.address.to_string(),
                        cause: Cause::Io(e),
                    })
                }
            }
        }

        Ok(())
    }

    /// Write all of `data`, looping over partial non-blocking writes.
    /// Returns the byte count written, which equals `data.len()` on success.
    pub fn write(&mut self, data: &[u8], deadline: Deadline) -> Result<usize> {
        self.check_open()?;

        let mut written = 0;
        let fd = self.transport.raw_fd();

        while written < data.len() {
            let transport = &mut self.transport;
            let wrote = deadline::run(fd, deadline, || transport.try_write(&data[written..]));

            match wrote {
                Ok(0) => {
                    return Err(Error::ConnectionFailure {
                        server: self.address.to_string(),
                        cause: Cause::Io(io::Error::from(io::ErrorKind::WriteZero)),
                    })
                }
                Ok(n) => written += n,
                Err(DeadlineError::Elapsed) => {
                    return Err(Error::WriteTimeout {
                        server: self.address.to_string(),
                    })
                }
                Err(DeadlineError::Io(e)) => {
                    return Err(Error::ConnectionFailure {
                        server: self.address.to_string(),
                        cause: Cause::Io(e),
                    })
                }
            }
        }

        Ok(written)
    }

    /// Close the connection. Idempotent; I/O errors during close are
    /// reported at debug level and swallowed.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        match &mut self.transport {
            Transport::Plain(stream) => {
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    debug!(server = %self.address, error = %e, "error during close");
                }
            }
            Transport::Tls(stream) => {
                // Best-effort close-notify; the peer may already be gone.
                let _ = stream.shutdown();
                if let Err(e) = stream.get_ref().shutdown(Shutdown::Both) {
                    debug!(server = %self.address, error = %e, "error during close");
                }
            }
        }
    }

    /// Best-effort liveness probe.
    ///
    /// A socket with pending data is peeked for end-of-stream without
    /// consuming bytes; a merely idle socket reports alive. A peer that was
    /// hard-killed without a close notification is not detectable here until
    /// the next real read or write.
    pub fn alive(&mut self) -> bool {
        if !self.open {
            return false;
        }

        if let Transport::Tls(stream) = &self.transport {
            if stream.ssl().pending() > 0 {
                return true;
            }
        }

        match deadline::ready_now(self.transport.raw_fd(), Direction::Read) {
            Err(_) => false,
            Ok(false) => true,
            Ok(true) => {
                let mut probe = [0u8; 1];
                match self.transport.tcp().peek(&mut probe) {
                    Ok(0) => false,
                    Ok(_) => true,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
                    Err(_) => false,
                }
            }
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::ConnectionFailure {
                server: self.address.to_string(),
                cause: Cause::NotConnected,
            })
        }
    }
}

fn new_socket(config: &Config) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    if !config.buffered {
        socket.set_nodelay(true)?;
    }
    if config.keepalive {
        socket.set_keepalive(true)?;
    }
    Ok(socket)
}
