//! Error types for the WebSocket client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Lifecycle operations on [`Client`](crate::Client) report plain booleans.
//! The `try_*` variants and the lower-level building blocks return
//! [`Result<T>`] which uses [`Error`]:
//!
//! ```no_run
//! use wsock_client::{Client, MessageType, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     client.try_start().await?;
//!     client.try_send("hello", MessageType::Text).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::InvalidUrl`], [`Error::Config`] |
//! | Connection | [`Error::Connect`], [`Error::NotConnected`] |
//! | Handshake | [`Error::HandshakeIncomplete`], [`Error::HandshakeRejected`] |
//! | Framing | [`Error::MalformedFrame`], [`Error::InvalidArgument`] |
//! | External | [`Error::Io`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// URL could not be parsed or does not use the `ws`/`wss` scheme.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    /// Client options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// TCP connect, DNS resolution or TLS negotiation failed.
    #[error("Connection failed: {message}")]
    Connect {
        /// Description of the connection error.
        message: String,
    },

    /// Operation requires an open connection.
    #[error("Not connected")]
    NotConnected,

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Peer closed the stream before the handshake response was complete.
    #[error("Handshake incomplete: connection closed after {received} bytes")]
    HandshakeIncomplete {
        /// Response bytes received before EOF.
        received: usize,
    },

    /// Handshake response was complete but did not accept the upgrade.
    #[error("Handshake rejected: {message}")]
    HandshakeRejected {
        /// Diagnostic from the handshake engine.
        message: String,
    },

    // ========================================================================
    // Framing Errors
    // ========================================================================
    /// Inbound bytes do not form a valid WebSocket frame sequence.
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// Description of the violation.
        message: String,
    },

    /// Outbound message cannot be encoded as given.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error after the connection was established.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a handshake incomplete error.
    #[inline]
    pub fn handshake_incomplete(received: usize) -> Self {
        Self::HandshakeIncomplete { received }
    }

    /// Creates a handshake rejected error.
    #[inline]
    pub fn handshake_rejected(message: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            message: message.into(),
        }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error happened while establishing a connection.
    ///
    /// These are the failures `start` recovers from internally.
    #[inline]
    #[must_use]
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::HandshakeIncomplete { .. } | Self::HandshakeRejected { .. }
        )
    }

    /// Returns `true` if this is a handshake error.
    #[inline]
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Self::HandshakeIncomplete { .. } | Self::HandshakeRejected { .. }
        )
    }

    /// Returns `true` if a later `start` may succeed.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::HandshakeIncomplete { .. }
                | Self::Io(_)
                | Self::MalformedFrame { .. }
                | Self::NotConnected
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
