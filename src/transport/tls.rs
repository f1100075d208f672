//! TLS client configuration.
//!
//! Builds the `rustls` client configuration used for `wss://` URLs.
//!
//! | `verify` | `ca_file` | Trust anchors |
//! |----------|-----------|---------------|
//! | `true` | `Some(path)` | PEM certificates from `path` |
//! | `true` | `None` | `webpki-roots` bundle |
//! | `false` | ignored | none, any certificate is accepted |

// ============================================================================
// Imports
// ============================================================================

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// TlsOptions
// ============================================================================

/// Peer verification settings for secure connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the server certificate chain and host name.
    pub verify: bool,
    /// PEM file with the CA certificates to trust when verifying.
    pub ca_file: Option<PathBuf>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify: true,
            ca_file: None,
        }
    }
}

impl TlsOptions {
    /// Builds the `rustls` client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the CA file cannot be read or holds no
    /// usable certificate.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        if !self.verify {
            warn!("TLS peer verification disabled");
            let config = ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
                .with_no_client_auth();
            return Ok(Arc::new(config));
        }

        let roots = match &self.ca_file {
            Some(path) => load_ca_file(path)?,
            None => RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            },
        };

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

/// Loads every PEM certificate from `path` into a root store.
fn load_ca_file(path: &Path) -> Result<RootCertStore> {
    let file = File::open(path).map_err(|e| {
        Error::connect(format!(
            "failed to read CA file '{}': {e}",
            path.display()
        ))
    })?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| {
            Error::connect(format!(
                "failed to parse CA file '{}': {e}",
                path.display()
            ))
        })?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    debug!(added, ignored, path = %path.display(), "CA file loaded");

    if added == 0 {
        return Err(Error::connect(format!(
            "no usable certificates in CA file '{}'",
            path.display()
        )));
    }

    Ok(roots)
}

// ============================================================================
// NoVerification
// ============================================================================

/// Accepts any server certificate.
///
/// Handshake signatures are still checked so the session keys belong to
/// whoever presented the certificate.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<CryptoProvider>,
}

impl NoVerification {
    fn new() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn test_default_verifies_with_bundled_roots() {
        let options = TlsOptions::default();
        assert!(options.verify);
        assert!(options.client_config().is_ok());
    }

    #[test]
    fn test_no_verification_config() {
        let options = TlsOptions {
            verify: false,
            ca_file: None,
        };
        assert!(options.client_config().is_ok());
    }

    #[test]
    fn test_missing_ca_file() {
        let options = TlsOptions {
            verify: true,
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
        };
        let err = options.client_config().unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        assert!(err.to_string().contains("ca.pem"));
    }

    #[test]
    fn test_ca_file_without_certificates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();

        let options = TlsOptions {
            verify: true,
            ca_file: Some(file.path().to_path_buf()),
        };
        let err = options.client_config().unwrap_err();
        assert!(err.to_string().contains("no usable certificates"));
    }
}
