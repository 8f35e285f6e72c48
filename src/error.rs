//! Error taxonomy for the client
//!
//! Every failure the client reports names the target server, and hard
//! failures carry the underlying cause so operators can tell "never
//! reachable" from "timed out" from "reset mid-stream".

use std::collections::HashSet;
use std::io;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A connect or TLS handshake deadline was exceeded
    #[error("connect to {server} timed out")]
    ConnectionTimeout { server: String },

    /// A read deadline was exceeded
    #[error("read from {server} timed out")]
    ReadTimeout { server: String },

    /// A write deadline was exceeded
    #[error("write to {server} timed out")]
    WriteTimeout { server: String },

    /// Hard transport, DNS or TLS failure
    #[error("connection to {server} failed: {cause}")]
    ConnectionFailure { server: String, cause: Cause },

    /// Malformed `"host:port"` server string
    #[error("invalid server address {0:?} (expected \"host:port\")")]
    InvalidServer(String),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// TLS configuration could not be built
    #[error("TLS configuration error: {0}")]
    Tls(#[from] crate::tls::TlsError),
}

impl Error {
    /// The retry classification key of this error, if it has one.
    ///
    /// Connect-level timeouts classify as `TimedOut`; read/write timeouts
    /// never drive retries and report `None`.
    pub(crate) fn retryable_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::ConnectionTimeout { .. } => Some(io::ErrorKind::TimedOut),
            Error::ConnectionFailure { cause, .. } => cause.retryable_kind(),
            _ => None,
        }
    }

    /// Extract the underlying cause for re-labeling a failure with the
    /// full server list after a connect sweep is exhausted.
    pub(crate) fn into_cause(self) -> Cause {
        match self {
            Error::ConnectionTimeout { .. } => Cause::ConnectTimeout,
            Error::ConnectionFailure { cause, .. } => cause,
            other => Cause::Other(other.to_string()),
        }
    }
}

/// Underlying cause of a [`Error::ConnectionFailure`]
#[derive(Debug, thiserror::Error)]
pub enum Cause {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The peer closed the stream before the requested byte count arrived
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// A connect deadline elapsed somewhere in an exhausted sweep
    #[error("connect timed out")]
    ConnectTimeout,

    /// TLS handshake or protocol failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// The peer certificate does not identify the dialed host
    #[error("certificate identity mismatch: expected {expected}, certificate names {actual}")]
    HostnameMismatch { expected: String, actual: String },

    /// An operation was issued while no connection is live
    #[error("client is not connected")]
    NotConnected,

    /// A connect sweep finished without trying a single address
    #[error("no candidate address was tried")]
    NoAddresses,

    /// `retry_on_connection_failure` gave up
    #[error("retries exhausted after {retries} attempts: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: Box<Cause>,
    },

    #[error("{0}")]
    Other(String),
}

impl Cause {
    fn retryable_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Cause::Io(e) => Some(e.kind()),
            Cause::UnexpectedEof => Some(io::ErrorKind::UnexpectedEof),
            Cause::ConnectTimeout => Some(io::ErrorKind::TimedOut),
            _ => None,
        }
    }

    /// Whether this cause is in the given retryable set
    pub fn is_retryable(&self, retryable: &HashSet<io::ErrorKind>) -> bool {
        self.retryable_kind().is_some_and(|k| retryable.contains(&k))
    }
}

/// The default retryable-cause set: transient transport failures that are
/// worth another address or another sweep. Owned per client and overridable
/// via the configuration builder without affecting other instances.
pub fn default_retryable_errors() -> HashSet<io::ErrorKind> {
    HashSet::from([
        io::ErrorKind::ConnectionRefused,
        io::ErrorKind::ConnectionReset,
        io::ErrorKind::ConnectionAborted,
        io::ErrorKind::HostUnreachable,
        io::ErrorKind::NetworkDown,
        io::ErrorKind::NetworkUnreachable,
        io::ErrorKind::BrokenPipe,
        io::ErrorKind::TimedOut,
        io::ErrorKind::UnexpectedEof,
    ])
}
