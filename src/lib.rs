//! Single-connection async WebSocket client.
//!
//! This library connects to one `ws://` or `wss://` URL, performs the
//! RFC 6455 opening handshake, and reports everything that happens on the
//! connection as events delivered to async handlers.
//!
//! # Architecture
//!
//! - **Transport**: TCP, optionally wrapped in TLS, split into a read half
//!   owned by the receive task and a write half shared by senders
//! - **Protocol**: I/O-free handshake engine and frame codec
//! - **Client**: lifecycle state machine, event dispatcher, optional
//!   reconnect supervisor
//!
//! Key design principles:
//!
//! - One [`Client`] is reused across reconnects; only the session changes
//! - `start`, `stop` and `send` report plain booleans, `try_*` variants
//!   return the [`Error`]
//! - Each handler runs on its own task; a panic never reaches the caller
//! - By default a `ping` is answered with a `pong` and a `disconnect`
//!   stops the client
//!
//! # Quick Start
//!
//! ```no_run
//! use wsock_client::{Client, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder("wss://echo.example.com/")
//!         .header("Authorization", "Bearer token")
//!         .build()?;
//!
//!     client.on_receive(|message| async move {
//!         println!("received: {:?}", message.as_text());
//!     });
//!
//!     if client.start().await {
//!         client.send_text("hello").await;
//!     }
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`], builder, events, reconnect supervisor |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | Handshake engine and frame codec |
//! | [`transport`] | TCP/TLS byte transport |
//!
//! # Logging
//!
//! The crate logs through `tracing` under the `wsock_client` target.
//! Install any subscriber to see lifecycle and dispatch records.

// ============================================================================
// Modules
// ============================================================================

/// Client facade: connection, events, configuration.
///
/// - [`Client`] - Connection handle
/// - [`ClientBuilder`] - Fluent construction
/// - [`Supervisor`] - Automatic reconnection
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// WebSocket wire protocol.
///
/// Handshake request/response handling and frame encoding/decoding.
pub mod protocol;

/// Byte transport.
///
/// TCP connection with optional TLS.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    Client, ClientBuilder, ClientOptions, ConnectionState, Event, EventKind, ReconnectConfig,
    Supervisor, WeakClient,
};

// Error types
pub use error::{Error, Result};

// Protocol types
pub use protocol::{Message, MessageType, ProtocolVersion};
