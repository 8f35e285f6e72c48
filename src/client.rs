//! Client orchestration
//!
//! The [`Client`] owns zero or one live [`Connection`] and drives the
//! selection policy, the connect-retry sweeps and the
//! `retry_on_connection_failure` wrapper. Every public operation blocks the
//! calling thread for at most its configured deadline; a client is not safe
//! for concurrent use without external synchronization.

use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{info, warn};

use crate::address;
use crate::config::{Config, OnConnect};
use crate::connection::Connection;
use crate::deadline::Deadline;
use crate::error::{Cause, Error, Result};
use crate::policy::Policy;

/// Resilient TCP client with reconnect and failover
pub struct Client {
    config: Config,
    policy: Policy,
    on_connect: Option<OnConnect>,
    conn: Option<Connection>,
}

impl Client {
    /// Create a disconnected client from a configuration
    pub fn new(mut config: Config) -> Self {
        let policy = std::mem::take(&mut config.policy);
        let on_connect = config.on_connect.take();
        Client {
            config,
            policy,
            on_connect,
            conn: None,
        }
    }

    /// Connect to the first reachable server.
    ///
    /// Any existing connection is closed first. The policy sequence is swept
    /// up to `connect_retry_count + 1` times, sleeping
    /// `connect_retry_interval` between sweeps as long as the most recent
    /// failure is in the retryable set. The first successful connect wins
    /// and triggers the `on_connect` callback exactly once.
    pub fn connect(&mut self) -> Result<()> {
        self.close();

        let addresses = address::resolve(&self.config.servers)?;
        let mut last_err: Option<Error> = None;

        for sweep in 0..=self.config.connect_retry_count {
            if sweep > 0 {
                info!(
                    sweep,
                    interval = self.config.connect_retry_interval,
                    "connect sweep failed, sleeping before retry"
                );
                thread::sleep(Duration::from_secs_f64(self.config.connect_retry_interval));
            }

            for addr in self.policy.sequence(&addresses) {
                match Connection::connect(&addr, &self.config) {
                    Ok(mut conn) => {
                        if let Some(callback) = self.on_connect.as_mut() {
                            if let Err(e) = callback(&mut conn) {
                                conn.close();
                                return Err(e);
                            }
                        }
                        self.conn = Some(conn);
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(server = %addr, error = %e, "connect attempt failed");
                        last_err = Some(e);
                    }
                }
            }

            let retryable = last_err
                .as_ref()
                .and_then(|e| e.retryable_kind())
                .is_some_and(|kind| self.config.retryable_errors.contains(&kind));
            if !retryable {
                break;
            }
        }

        Err(match last_err {
            // The policy produced nothing to try; report that rather than a
            // bare DNS or iteration artifact.
            None => Error::ConnectionFailure {
                server: self.config.server_list(),
                cause: Cause::NoAddresses,
            },
            // A timeout keeps its type; hard failures are re-labeled with
            // the full server list that was attempted.
            Some(timeout @ Error::ConnectionTimeout { .. }) => timeout,
            Some(e) => Error::ConnectionFailure {
                server: self.config.server_list(),
                cause: e.into_cause(),
            },
        })
    }

    /// Read exactly `len` bytes from the live connection.
    ///
    /// `timeout` overrides the configured `read_timeout` for this call;
    /// `-1` waits forever. Partial data gathered before a timeout is
    /// discarded.
    pub fn read(&mut self, len: usize, timeout: Option<f64>) -> Result<Bytes> {
        let deadline = Deadline::after(timeout.unwrap_or(self.config.read_timeout));
        let result = match self.conn.as_mut() {
            Some(conn) => conn.read(len, deadline),
            None => Err(self.not_connected()),
        };
        self.guard(result)
    }

    /// Read exactly `len` bytes into a caller-supplied buffer; on timeout
    /// the bytes received so far remain in `out`.
    pub fn read_into(
        &mut self,
        len: usize,
        out: &mut BytesMut,
        timeout: Option<f64>,
    ) -> Result<()> {
        let deadline = Deadline::after(timeout.unwrap_or(self.config.read_timeout));
        let result = match self.conn.as_mut() {
            Some(conn) => conn.read_into(len, out, deadline),
            None => Err(self.not_connected()),
        };
        self.guard(result)
    }

    /// Write all of `data` to the live connection, returning the byte count
    /// written. `timeout` overrides the configured `write_timeout`.
    pub fn write(&mut self, data: &[u8], timeout: Option<f64>) -> Result<usize> {
        let deadline = Deadline::after(timeout.unwrap_or(self.config.write_timeout));
        let result = match self.conn.as_mut() {
            Some(conn) => conn.write(data, deadline),
            None => Err(self.not_connected()),
        };
        self.guard(result)
    }

    /// Close the live connection, if any. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
    }

    /// Whether the client currently holds no live connection
    pub fn closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Best-effort liveness of the current connection; see
    /// [`Connection::alive`] for the caveats.
    pub fn alive(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.alive(),
            None => false,
        }
    }

    /// The address of the live connection, if any
    pub fn peer(&self) -> Option<&crate::address::Address> {
        self.conn.as_ref().map(Connection::address)
    }

    /// Run `block`, reconnecting and re-executing it on retryable
    /// connection failures.
    ///
    /// The client reconnects first if currently disconnected. A
    /// `ConnectionFailure` whose cause is outside the retryable set, and any
    /// error that is not a `ConnectionFailure`, propagates immediately
    /// without retry. Once `retry_count` re-executions are exhausted the
    /// original cause is wrapped in [`Cause::RetriesExhausted`].
    pub fn retry_on_connection_failure<T>(
        &mut self,
        mut block: impl FnMut(&mut Client) -> Result<T>,
    ) -> Result<T> {
        let mut retries: u32 = 0;

        loop {
            if self.closed() {
                self.connect()?;
            }

            match block(self) {
                Ok(value) => return Ok(value),
                Err(Error::ConnectionFailure { server, cause }) => {
                    if !cause.is_retryable(&self.config.retryable_errors) {
                        return Err(Error::ConnectionFailure { server, cause });
                    }
                    if retries >= self.config.retry_count {
                        return Err(Error::ConnectionFailure {
                            server,
                            cause: Cause::RetriesExhausted {
                                retries,
                                source: Box::new(cause),
                            },
                        });
                    }
                    retries += 1;
                    warn!(server = %server, retries, error = %cause, "reconnecting after connection failure");
                    self.connect()?;
                }
                Err(other) => {
                    // The connection state after an arbitrary failure is
                    // unknown; leave it closed when configured to.
                    if self.config.close_on_error {
                        self.close();
                    }
                    return Err(other);
                }
            }
        }
    }

    fn not_connected(&self) -> Error {
        Error::ConnectionFailure {
            server: self.config.server_list(),
            cause: Cause::NotConnected,
        }
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() && self.config.close_on_error {
            self.close();
        }
        result
    }
}
