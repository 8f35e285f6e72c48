//! TLS configuration
//!
//! Client-side TLS settings, collected by a builder and frozen into an
//! OpenSSL context when built. Verification of the peer certificate chain
//! and of the certificate identity are on by default; both can be disabled
//! independently for test setups.

use std::path::{Path, PathBuf};

use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::X509;

/// TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    fn to_openssl(self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }
}

/// TLS configuration errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("certificate error: {0}")]
    Certificate(String),
}

/// Immutable TLS settings for a client
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) verify_hostname: bool,
    pub(crate) servername: Option<String>,
    pub(crate) handshake_timeout: Option<f64>,
}

impl TlsConfig {
    /// Start building a client TLS configuration
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::new()
    }
}

enum TrustMaterial {
    CaFile(PathBuf),
    CaPem(Vec<u8>),
}

/// Builder for [`TlsConfig`]
pub struct TlsConfigBuilder {
    trust: Vec<TrustMaterial>,
    verify_peer: bool,
    verify_hostname: bool,
    servername: Option<String>,
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    handshake_timeout: Option<f64>,
}

impl TlsConfigBuilder {
    fn new() -> Self {
        TlsConfigBuilder {
            trust: Vec::new(),
            verify_peer: true,
            verify_hostname: true,
            servername: None,
            min_version: None,
            max_version: None,
            handshake_timeout: None,
        }
    }

    /// Trust the CA certificates in a PEM file, in addition to the system
    /// default verify paths.
    pub fn ca_file(mut self, path: impl AsRef<Path>) -> Self {
        self.trust.push(TrustMaterial::CaFile(path.as_ref().to_path_buf()));
        self
    }

    /// Trust CA certificates supplied as in-memory PEM
    pub fn ca_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.trust.push(TrustMaterial::CaPem(pem.into()));
        self
    }

    /// Enable or disable verification of the peer certificate chain.
    /// Disabling also disables the identity check.
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Enable or disable matching the peer certificate identity against the
    /// dialed host name after the handshake
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.verify_hostname = verify;
        self
    }

    /// Override the SNI server name (defaults to the dialed host name)
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Pin the protocol to a single version
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Restrict the protocol version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Handshake deadline in seconds; `-1` waits forever. Defaults to the
    /// client's connect timeout.
    pub fn handshake_timeout(mut self, seconds: f64) -> Self {
        self.handshake_timeout = Some(seconds);
        self
    }

    /// Freeze the settings into an OpenSSL context
    pub fn build(self) -> super::Result<TlsConfig> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_client())?;

        ctx.set_min_proto_version(self.min_version.map(TlsVersion::to_openssl))?;
        ctx.set_max_proto_version(self.max_version.map(TlsVersion::to_openssl))?;

        if self.verify_peer {
            ctx.set_verify(SslVerifyMode::PEER);
            ctx.set_default_verify_paths()?;
        } else {
            ctx.set_verify(SslVerifyMode::NONE);
        }

        for material in self.trust {
            match material {
                TrustMaterial::CaFile(path) => {
                    ctx.set_ca_file(&path).map_err(|e| {
                        TlsError::Certificate(format!(
                            "failed to load CA file {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                }
                TrustMaterial::CaPem(pem) => {
                    let certs = X509::stack_from_pem(&pem)
                        .map_err(|e| TlsError::Certificate(format!("invalid CA PEM: {}", e)))?;
                    if certs.is_empty() {
                        return Err(TlsError::Certificate(
                            "CA PEM contains no certificates".into(),
                        ));
                    }
                    let store = ctx.cert_store_mut();
                    for cert in certs {
                        store.add_cert(cert)?;
                    }
                }
            }
        }

        Ok(TlsConfig {
            ctx: ctx.build(),
            verify_hostname: self.verify_peer && self.verify_hostname,
            servername: self.servername,
            handshake_timeout: self.handshake_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_verify_everything() {
        let config = TlsConfig::builder().build().unwrap();
        assert!(config.verify_hostname);
        assert!(config.servername.is_none());
        assert!(config.handshake_timeout.is_none());
    }

    #[test]
    fn test_verify_peer_off_disables_identity_check() {
        let config = TlsConfig::builder()
            .verify_peer(false)
            .verify_hostname(true)
            .build()
            .unwrap();
        assert!(!config.verify_hostname);
    }

    #[test]
    fn test_servername_and_timeout() {
        let config = TlsConfig::builder()
            .servername("backend.internal")
            .handshake_timeout(2.5)
            .build()
            .unwrap();
        assert_eq!(config.servername.as_deref(), Some("backend.internal"));
        assert_eq!(config.handshake_timeout, Some(2.5));
    }

    #[test]
    fn test_version_range_builds() {
        let config = TlsConfig::builder()
            .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
            .verify_peer(false)
            .build();
        assert!(config.is_ok());
    }

    #[test]
    fn test_bad_ca_pem_is_rejected() {
        let result = TlsConfig::builder().ca_pem("not a certificate").build();
        assert!(matches!(result, Err(TlsError::Certificate(_))));
    }
}
