//! Client facade.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent construction of a [`Client`] |
//! | `connection` | Lifecycle state machine, send path, receive task |
//! | `events` | Event kinds and the handler table |
//! | `options` | Connection configuration |
//! | `supervisor` | Reconnect loop with exponential backoff |

// ============================================================================
// Submodules
// ============================================================================

/// Client builder.
pub mod builder;

/// Connection state machine.
pub mod connection;

/// Events and dispatcher.
pub mod events;

/// Client configuration.
pub mod options;

/// Reconnect supervisor.
pub mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use connection::{Client, ConnectionState, WeakClient};
pub use events::{Event, EventDispatcher, EventKind, Handler};
pub use options::ClientOptions;
pub use supervisor::{ReconnectConfig, Supervisor};
