//! WebSocket wire protocol.
//!
//! Pure, I/O-free building blocks: the opening handshake and the frame
//! codec. The connection layer drives them with bytes from the transport.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handshake` | HTTP Upgrade request and incremental response parser |
//! | `frame` | Message types and masked frame encoding |
//! | `decoder` | Incremental frame decoding with fragment reassembly |

// ============================================================================
// Submodules
// ============================================================================

/// Incremental inbound frame decoder.
pub mod decoder;

/// Frame types and outbound encoding.
pub mod frame;

/// Client opening handshake.
pub mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use decoder::{DEFAULT_MAX_MESSAGE_SIZE, FrameDecoder};
pub use frame::{MAX_CONTROL_PAYLOAD, Message, MessageType, ProtocolVersion, encode};
pub use handshake::{Handshake, compute_accept_key, parse_ws_url};
