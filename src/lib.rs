//! Resilient TCP client with timeouts, failover and optional TLS
//!
//! A drop-in substitute for a raw stream-socket client that adds connection
//! timeouts, read/write timeouts, automatic reconnect with failover across
//! multiple candidate servers, pluggable server-selection policies, and
//! optional TLS with hostname verification. The client moves opaque byte
//! buffers only; framing and parsing belong to the caller.
//!
//! Timeouts are in seconds, with `-1` as the "wait forever" sentinel. All
//! calls are synchronous and block the calling thread for at most their
//! deadline.
//!
//! # Examples
//!
//! ```no_run
//! use tcp_failover::{Client, Config, Policy};
//!
//! let config = Config::builder()
//!     .servers(["primary.example:5170", "standby.example:5170"])
//!     .connect_timeout(2.0)
//!     .read_timeout(5.0)
//!     .policy(Policy::Ordered)
//!     .build()
//!     .unwrap();
//!
//! let mut client = Client::new(config);
//! client.connect().unwrap();
//! client.write(b"ping", None).unwrap();
//! let reply = client.read(4, None).unwrap();
//! assert_eq!(&reply[..], b"pong");
//! ```

pub mod address;
pub mod client;
pub mod config;
pub mod connection;
pub mod deadline;
pub mod error;
pub mod policy;
pub mod tls;

pub use address::Address;
pub use client::Client;
pub use config::{Config, ConfigBuilder, OnConnect};
pub use connection::Connection;
pub use deadline::Deadline;
pub use error::{default_retryable_errors, Cause, Error, Result};
pub use policy::Policy;
pub use tls::{TlsConfig, TlsVersion};
