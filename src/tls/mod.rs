//! TLS layering for client connections
//!
//! When TLS is requested, a completed plain connection is wrapped by an
//! OpenSSL session before it is handed to the caller. The handshake runs
//! through the same deadline primitive as a socket connect, with its own
//! configurable deadline, and is followed by certificate identity
//! verification against the dialed host name.

pub mod config;
pub mod session;

pub use config::{TlsConfig, TlsConfigBuilder, TlsError, TlsVersion};

/// Result type for TLS configuration
pub type Result<T> = std::result::Result<T, TlsError>;
