//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use wsock_client::{Client, EventKind};
//!
//! # async fn example() -> wsock_client::Result<()> {
//! let client = Client::builder("wss://echo.example.com/socket")
//!     .header("Authorization", "Bearer token")
//!     .ssl_verify(true)
//!     .on(EventKind::Connect, |_| async { println!("connected") })
//!     .connect()
//!     .await?;
//!
//! assert!(client.is_connected());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::path::PathBuf;

use crate::error::Result;
use crate::protocol::parse_ws_url;

use super::connection::Client;
use super::events::{Event, EventKind, Handler, handler};
use super::options::ClientOptions;

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`].
///
/// Use [`Client::builder()`] to create a new builder.
pub struct ClientBuilder {
    /// Target URL, parsed on build.
    url: String,
    /// Connection options.
    options: ClientOptions,
    /// Handlers registered after the defaults.
    handlers: Vec<(EventKind, Handler)>,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.handlers.iter().map(|(kind, _)| kind.as_str()).collect();
        f.debug_struct("ClientBuilder")
            .field("url", &self.url)
            .field("options", &self.options)
            .field("handlers", &kinds)
            .finish()
    }
}

// ============================================================================
// ClientBuilder Implementation
// ============================================================================

impl ClientBuilder {
    /// Creates a builder for `url` with default options.
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: ClientOptions::new(),
            handlers: Vec::new(),
        }
    }

    /// Adds a handshake header.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.with_header(name, value);
        self
    }

    /// Adds multiple handshake headers.
    #[inline]
    #[must_use]
    pub fn headers<N, V>(mut self, headers: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.options = self.options.with_headers(headers);
        self
    }

    /// Enables or disables server certificate verification.
    #[inline]
    #[must_use]
    pub fn ssl_verify(mut self, verify: bool) -> Self {
        self.options = self.options.with_ssl_verify(verify);
        self
    }

    /// Sets the CA certificate file used for verification.
    #[inline]
    #[must_use]
    pub fn cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options = self.options.with_cert_file(path);
        self
    }

    /// Sets the inbound message size limit.
    #[inline]
    #[must_use]
    pub fn max_message_size(mut self, max: usize) -> Self {
        self.options = self.options.with_max_message_size(max);
        self
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers a handler, applied after the built-in ones.
    #[must_use]
    pub fn on<F, Fut>(mut self, kind: EventKind, f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.push((kind, handler(f)));
        self
    }

    /// Builds an idle client.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`](crate::Error::InvalidUrl) if the URL is not a `ws`/`wss` URL with a host
    /// - [`Error::Config`](crate::Error::Config) if the options are invalid
    pub fn build(self) -> Result<Client> {
        let url = parse_ws_url(&self.url)?;
        self.options.validate()?;

        let client = Client::new(url, self.options);
        for (kind, handler) in self.handlers {
            client.register(kind, handler);
        }
        Ok(client)
    }

    /// Builds the client and starts it.
    ///
    /// A failed connection attempt is not an error; check
    /// [`Client::is_connected`].
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub async fn connect(self) -> Result<Client> {
        let client = self.build()?;
        client.start().await;
        Ok(client)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;

    #[test]
    fn test_build_rejects_bad_url() {
        let err = Client::builder("http://example.com/").build().unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));

        let err = Client::builder("not a url").build().unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn test_build_rejects_bad_options() {
        let err = Client::builder("ws://localhost/")
            .header("", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_applies_options() {
        let client = Client::builder("wss://example.com:8443/feed?x=1")
            .header("A", "1")
            .headers([("B", "2")])
            .ssl_verify(false)
            .max_message_size(4096)
            .build()
            .unwrap();

        assert_eq!(client.url().as_str(), "wss://example.com:8443/feed?x=1");
        assert_eq!(client.options().headers.len(), 2);
        assert!(!client.options().ssl_verify);
        assert_eq!(client.options().max_message_size, 4096);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_host_is_not_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = Client::builder(format!("ws://127.0.0.1:{port}/"))
            .connect()
            .await
            .unwrap();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_builder_debug_lists_handlers() {
        let builder = Client::builder("ws://localhost/").on(EventKind::Receive, |_| async {});
        let debug = format!("{builder:?}");
        assert!(debug.contains("receive"));
    }
}
