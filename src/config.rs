//! Client configuration
//!
//! An immutable snapshot built once at client construction. Timeouts are in
//! seconds with `-1` as the documented "wait forever" sentinel, honored
//! uniformly by connect, read and write.

use std::collections::HashSet;
use std::io;

use crate::address;
use crate::connection::Connection;
use crate::error::{self, Error, Result};
use crate::policy::Policy;
use crate::tls::TlsConfig;

/// Callback invoked once per successful connection, before the connection
/// is handed back to the caller. Typically used for an application-level
/// greeting or authentication exchange.
pub type OnConnect = Box<dyn FnMut(&mut Connection) -> Result<()> + Send>;

/// Immutable client configuration
pub struct Config {
    pub(crate) servers: Vec<String>,
    pub(crate) connect_timeout: f64,
    pub(crate) read_timeout: f64,
    pub(crate) write_timeout: f64,
    pub(crate) connect_retry_count: u32,
    pub(crate) connect_retry_interval: f64,
    pub(crate) retry_count: u32,
    pub(crate) buffered: bool,
    pub(crate) keepalive: bool,
    pub(crate) close_on_error: bool,
    pub(crate) retryable_errors: HashSet<io::ErrorKind>,
    pub(crate) tls: Option<TlsConfig>,
    pub(crate) policy: Policy,
    pub(crate) on_connect: Option<OnConnect>,
}

impl Config {
    /// Start building a configuration
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// All configured server strings, for error reports
    pub(crate) fn server_list(&self) -> String {
        self.servers.join(", ")
    }
}

/// Builder for [`Config`]
pub struct ConfigBuilder {
    servers: Vec<String>,
    connect_timeout: f64,
    read_timeout: f64,
    write_timeout: f64,
    connect_retry_count: u32,
    connect_retry_interval: f64,
    retry_count: u32,
    buffered: bool,
    keepalive: bool,
    close_on_error: bool,
    retryable_errors: HashSet<io::ErrorKind>,
    tls: Option<TlsConfig>,
    policy: Policy,
    on_connect: Option<OnConnect>,
}

impl ConfigBuilder {
    fn new() -> Self {
        ConfigBuilder {
            servers: Vec::new(),
            connect_timeout: 10.0,
            read_timeout: -1.0,
            write_timeout: -1.0,
            connect_retry_count: 3,
            connect_retry_interval: 0.5,
            retry_count: 3,
            buffered: true,
            keepalive: false,
            close_on_error: false,
            retryable_errors: error::default_retryable_errors(),
            tls: None,
            policy: Policy::Ordered,
            on_connect: None,
        }
    }

    /// Add one `"host:port"` server
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.servers.push(server.into());
        self
    }

    /// Add several `"host:port"` servers
    pub fn servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers.extend(servers.into_iter().map(Into::into));
        self
    }

    /// Connect deadline in seconds; `-1` waits forever. Default 10.
    pub fn connect_timeout(mut self, seconds: f64) -> Self {
        self.connect_timeout = seconds;
        self
    }

    /// Default read deadline in seconds; `-1` waits forever. Default `-1`.
    pub fn read_timeout(mut self, seconds: f64) -> Self {
        self.read_timeout = seconds;
        self
    }

    /// Default write deadline in seconds; `-1` waits forever. Default `-1`.
    pub fn write_timeout(mut self, seconds: f64) -> Self {
        self.write_timeout = seconds;
        self
    }

    /// Number of additional full policy sweeps after the first one fails.
    /// Default 3.
    pub fn connect_retry_count(mut self, count: u32) -> Self {
        self.connect_retry_count = count;
        self
    }

    /// Sleep between connect sweeps, in seconds. Default 0.5.
    pub fn connect_retry_interval(mut self, seconds: f64) -> Self {
        self.connect_retry_interval = seconds;
        self
    }

    /// Bound on [`crate::Client::retry_on_connection_failure`]
    /// re-executions. Default 3.
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Disable to set TCP_NODELAY on new connections. Default enabled
    /// (Nagle on).
    pub fn buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    /// Enable OS-level keepalive probing. Default off.
    pub fn keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Close the connection automatically when a read or write fails,
    /// leaving the client disconnected instead of holding a socket in an
    /// unknown protocol state. Default off.
    pub fn close_on_error(mut self, close: bool) -> Self {
        self.close_on_error = close;
        self
    }

    /// Replace the retryable-cause set for this client. Other clients are
    /// unaffected; the default is [`error::default_retryable_errors`].
    pub fn retryable_errors(mut self, kinds: HashSet<io::ErrorKind>) -> Self {
        self.retryable_errors = kinds;
        self
    }

    /// Server-selection policy. Default [`Policy::Ordered`].
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Callback invoked once per new connection, before first use
    pub fn on_connect(
        mut self,
        callback: impl FnMut(&mut Connection) -> Result<()> + Send + 'static,
    ) -> Self {
        self.on_connect = Some(Box::new(callback));
        self
    }

    /// Enable TLS with the given settings
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<Config> {
        if self.servers.is_empty() {
            return Err(Error::InvalidServer("<no servers configured>".into()));
        }
        for server in &self.servers {
            address::parse_server(server)?;
        }
        for timeout in [self.connect_timeout, self.read_timeout, self.write_timeout] {
            if timeout.is_nan() || timeout.is_infinite() {
                return Err(Error::InvalidConfig(format!("invalid timeout value {timeout}")));
            }
        }

        Ok(Config {
            servers: self.servers,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            connect_retry_count: self.connect_retry_count,
            connect_retry_interval: self.connect_retry_interval.max(0.0),
            retry_count: self.retry_count,
            buffered: self.buffered,
            keepalive: self.keepalive,
            close_on_error: self.close_on_error,
            retryable_errors: self.retryable_errors,
            tls: self.tls,
            policy: self.policy,
            on_connect: self.on_connect,
        })
    }
}
