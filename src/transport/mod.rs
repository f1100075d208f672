//! Byte transport.
//!
//! Opens the TCP connection, optionally upgrades it to TLS, and splits it
//! into a buffered read half (owned by the receive task) and a write half
//! (shared by senders).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `stream` | TCP/TLS stream, read and write halves |
//! | `tls` | `rustls` configuration and peer verification modes |

// ============================================================================
// Submodules
// ============================================================================

/// TCP/TLS stream and its halves.
pub mod stream;

/// TLS client configuration.
pub mod tls;

// ============================================================================
// Re-exports
// ============================================================================

pub use stream::{MaybeTlsStream, Transport, TransportReader, TransportWriter};
pub use tls::TlsOptions;
