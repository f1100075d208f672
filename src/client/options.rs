//! Client configuration.
//!
//! Provides a type-safe interface for the settings a [`Client`](crate::Client)
//! carries across reconnects: extra handshake headers, TLS verification and
//! the inbound message size limit.
//!
//! # Example
//!
//! ```no_run
//! use wsock_client::ClientOptions;
//!
//! # fn example() -> wsock_client::Result<()> {
//! let options = ClientOptions::new()
//!     .with_header("Authorization", "Bearer token")
//!     .with_ssl_verify(false)
//!     .with_max_message_size(1024 * 1024);
//!
//! options.validate()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use crate::transport::TlsOptions;

// ============================================================================
// ClientOptions
// ============================================================================

/// Connection configuration.
///
/// Immutable once the client is built; every `start` uses the same values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Extra headers appended to the handshake request, in order.
    pub headers: Vec<(String, String)>,

    /// Verify the server certificate on `wss://` connections.
    pub ssl_verify: bool,

    /// PEM file with CA certificates used when verifying.
    pub cert_file: Option<PathBuf>,

    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with default settings.
    ///
    /// Peer verification is on and the message limit is
    /// [`DEFAULT_MAX_MESSAGE_SIZE`].
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            headers: Vec::new(),
            ssl_verify: true,
            cert_file: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Adds a handshake header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds multiple handshake headers.
    #[inline]
    #[must_use]
    pub fn with_headers<N, V>(mut self, headers: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(n, v)| (n.into(), v.into())));
        self
    }

    /// Enables or disables server certificate verification.
    #[inline]
    #[must_use]
    pub fn with_ssl_verify(mut self, verify: bool) -> Self {
        self.ssl_verify = verify;
        self
    }

    /// Sets the CA certificate file.
    #[inline]
    #[must_use]
    pub fn with_cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(path.into());
        self
    }

    /// Sets the inbound message size limit.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl ClientOptions {
    /// Returns the TLS settings derived from these options.
    #[must_use]
    pub fn tls_options(&self) -> TlsOptions {
        TlsOptions {
            verify: self.ssl_verify,
            ca_file: self.cert_file.clone(),
        }
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty or malformed header name, a
    /// header value containing a line break, or a zero message limit.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in &self.headers {
            if name.is_empty() {
                return Err(Error::config("header name must not be empty"));
            }
            if name
                .chars()
                .any(|c| c.is_ascii_whitespace() || c == ':' || c.is_control())
            {
                return Err(Error::config(format!("invalid header name '{name}'")));
            }
            if value.contains(['\r', '\n']) {
                return Err(Error::config(format!(
                    "value of header '{name}' contains a line break"
                )));
            }
        }

        if self.max_message_size == 0 {
            return Err(Error::config("max message size must be greater than zero"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::new();
        assert!(options.headers.is_empty());
        assert!(options.ssl_verify);
        assert!(options.cert_file.is_none());
        assert_eq!(options.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(options, ClientOptions::default());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let options = ClientOptions::new()
            .with_header("A", "1")
            .with_headers([("B", "2"), ("C", "3")])
            .with_ssl_verify(false)
            .with_cert_file("/etc/ca.pem")
            .with_max_message_size(1024);

        assert_eq!(
            options.headers,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string()),
                ("C".to_string(), "3".to_string()),
            ]
        );
        assert!(!options.ssl_verify);
        assert_eq!(options.max_message_size, 1024);
    }

    #[test]
    fn test_tls_options() {
        let tls = ClientOptions::new()
            .with_ssl_verify(false)
            .with_cert_file("/etc/ca.pem")
            .tls_options();
        assert!(!tls.verify);
        assert_eq!(tls.ca_file, Some(PathBuf::from("/etc/ca.pem")));
    }

    #[test]
    fn test_validate_rejects_bad_headers() {
        assert!(ClientOptions::new().with_header("", "x").validate().is_err());
        assert!(
            ClientOptions::new()
                .with_header("Bad Name", "x")
                .validate()
                .is_err()
        );
        assert!(
            ClientOptions::new()
                .with_header("X-Token", "a\r\nInjected: yes")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let err = ClientOptions::new()
            .with_max_message_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
