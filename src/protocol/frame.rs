//! Frame types and outbound encoding.
//!
//! Implements the client side of the RFC 6455 wire format:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key (client frames)     |      Payload Data       |
//! +-------------------------------------+-------------------------+
//! ```
//!
//! Outbound frames are always masked with a fresh random key. Inbound
//! decoding lives in [`super::decoder`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// FIN bit of the first header byte.
pub(crate) const FIN_BIT: u8 = 0x80;

/// Reserved bits RSV1..RSV3 of the first header byte.
pub(crate) const RSV_BITS: u8 = 0x70;

/// Opcode bits of the first header byte.
pub(crate) const OPCODE_BITS: u8 = 0x0F;

/// MASK bit of the second header byte.
pub(crate) const MASK_BIT: u8 = 0x80;

/// 7-bit length bits of the second header byte.
pub(crate) const LEN_BITS: u8 = 0x7F;

/// Largest payload length encodable in the 7-bit form.
pub(crate) const MAX_SHORT_LEN: usize = 125;

/// 7-bit marker selecting the 16-bit extended length.
pub(crate) const LEN_16_MARKER: u8 = 126;

/// 7-bit marker selecting the 64-bit extended length.
pub(crate) const LEN_64_MARKER: u8 = 127;

/// Largest payload allowed in a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

// ============================================================================
// ProtocolVersion
// ============================================================================

/// WebSocket protocol version negotiated by the handshake.
///
/// Versions 7, 8 and 13 share the same framing; 13 is what the client
/// advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(u8);

impl ProtocolVersion {
    /// RFC 6455.
    pub const V13: Self = Self(13);

    /// Creates a version, rejecting ones with unknown framing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for versions other than 7, 8 and 13.
    pub fn new(version: u8) -> Result<Self> {
        match version {
            7 | 8 | 13 => Ok(Self(version)),
            other => Err(Error::invalid_argument(format!(
                "unsupported WebSocket version: {other}"
            ))),
        }
    }

    /// Returns the numeric version.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V13
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// MessageType
// ============================================================================

/// Type of a frame or logical message, keyed by opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text.
    Text,
    /// Opaque binary data.
    Binary,
    /// Connection close.
    Close,
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
}

impl MessageType {
    /// Returns the wire opcode.
    #[inline]
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Maps a wire opcode back to a type.
    ///
    /// Returns `None` for reserved opcodes.
    #[inline]
    #[must_use]
    pub const fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Returns `true` for close, ping and pong.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns the lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Message
// ============================================================================

/// A complete logical message: type plus payload.
///
/// Fragmented inbound messages are reassembled before a `Message` is built,
/// so `kind` is never [`MessageType::Continuation`] for decoded messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageType,
    payload: Bytes,
}

impl Message {
    /// Creates a message.
    #[inline]
    #[must_use]
    pub fn new(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Creates a text message.
    #[inline]
    #[must_use]
    pub fn text(payload: impl Into<String>) -> Self {
        Self::new(MessageType::Text, Bytes::from(payload.into()))
    }

    /// Creates a binary message.
    #[inline]
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Binary, payload)
    }

    /// Returns the message type.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        self.kind
    }

    /// Returns the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the message, returning its payload.
    #[inline]
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Returns the payload as text when it is valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Encodes the message as a single masked client frame.
    ///
    /// # Errors
    ///
    /// See [`encode`].
    pub fn encode(&self, version: ProtocolVersion) -> Result<Bytes> {
        encode(self.kind, &self.payload, version)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes one masked, final client frame.
///
/// The length form (7-bit, 16-bit or 64-bit) is chosen from the payload
/// size. A fresh random mask key is drawn for every frame.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if a control frame payload exceeds
/// 125 bytes or `kind` is [`MessageType::Continuation`].
pub fn encode(kind: MessageType, payload: &[u8], version: ProtocolVersion) -> Result<Bytes> {
    encode_with_mask(kind, payload, version, rand::random())
}

/// Encodes with a caller-chosen mask key.
pub(crate) fn encode_with_mask(
    kind: MessageType,
    payload: &[u8],
    version: ProtocolVersion,
    mask: [u8; 4],
) -> Result<Bytes> {
    // Every supported version shares the RFC 6455 layout.
    debug_assert!(ProtocolVersion::new(version.get()).is_ok());

    if kind == MessageType::Continuation {
        return Err(Error::invalid_argument(
            "continuation frames are produced by fragmentation, not sent directly",
        ));
    }

    if kind.is_control() && payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(Error::invalid_argument(format!(
            "{kind} payload of {} bytes exceeds {MAX_CONTROL_PAYLOAD}",
            payload.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(header_len(payload.len()) + payload.len());
    buf.put_u8(FIN_BIT | kind.opcode());

    match payload.len() {
        len if len <= MAX_SHORT_LEN => buf.put_u8(MASK_BIT | len as u8),
        len if len <= usize::from(u16::MAX) => {
            buf.put_u8(MASK_BIT | LEN_16_MARKER);
            buf.put_u16(len as u16);
        }
        len => {
            buf.put_u8(MASK_BIT | LEN_64_MARKER);
            buf.put_u64(len as u64);
        }
    }

    buf.put_slice(&mask);
    let start = buf.len();
    buf.put_slice(payload);
    apply_mask(&mut buf[start..], mask);

    Ok(buf.freeze())
}

/// XORs `data` in place with the repeating 4-byte `mask`.
#[inline]
pub(crate) fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Header size of a masked frame carrying `payload_len` bytes.
#[inline]
const fn header_len(payload_len: usize) -> usize {
    let base = 2 + 4;
    if payload_len <= MAX_SHORT_LEN {
        base
    } else if payload_len <= u16::MAX as usize {
        base + 2
    } else {
        base + 8
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[test]
    fn test_encode_masked_hello() {
        // RFC 6455 section 5.7 example.
        let frame =
            encode_with_mask(MessageType::Text, b"Hello", ProtocolVersion::V13, MASK).unwrap();
        assert_eq!(
            &frame[..],
            &[
                0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58
            ]
        );
    }

    #[test]
    fn test_length_forms() {
        let v = ProtocolVersion::V13;

        let short = encode_with_mask(MessageType::Binary, &[0; 125], v, MASK).unwrap();
        assert_eq!(short[1], MASK_BIT | 125);
        assert_eq!(short.len(), 2 + 4 + 125);

        let medium = encode_with_mask(MessageType::Binary, &[0; 126], v, MASK).unwrap();
        assert_eq!(medium[1], MASK_BIT | LEN_16_MARKER);
        assert_eq!(u16::from_be_bytes([medium[2], medium[3]]), 126);

        let max16 = encode_with_mask(MessageType::Binary, &vec![0; 65535], v, MASK).unwrap();
        assert_eq!(max16[1], MASK_BIT | LEN_16_MARKER);
        assert_eq!(max16.len(), 2 + 2 + 4 + 65535);

        let long = encode_with_mask(MessageType::Binary, &vec![0; 65536], v, MASK).unwrap();
        assert_eq!(long[1], MASK_BIT | LEN_64_MARKER);
        let mut len = [0u8; 8];
        len.copy_from_slice(&long[2..10]);
        assert_eq!(u64::from_be_bytes(len), 65536);
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode(MessageType::Ping, b"", ProtocolVersion::V13).unwrap();
        assert_eq!(frame[0], 0x89);
        assert_eq!(frame[1], MASK_BIT);
        assert_eq!(frame.len(), 6);
    }

    #[test]
    fn test_control_frame_too_large() {
        let err = encode(MessageType::Ping, &[0; 126], ProtocolVersion::V13).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_continuation_rejected() {
        let err = encode(MessageType::Continuation, b"x", ProtocolVersion::V13).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_opcode_mapping() {
        for kind in [
            MessageType::Continuation,
            MessageType::Text,
            MessageType::Binary,
            MessageType::Close,
            MessageType::Ping,
            MessageType::Pong,
        ] {
            assert_eq!(MessageType::from_opcode(kind.opcode()), Some(kind));
        }
        assert_eq!(MessageType::from_opcode(0x3), None);
        assert_eq!(MessageType::from_opcode(0xB), None);
    }

    #[test]
    fn test_version_validation() {
        assert!(ProtocolVersion::new(13).is_ok());
        assert!(ProtocolVersion::new(8).is_ok());
        assert!(ProtocolVersion::new(76).is_err());
        assert_eq!(ProtocolVersion::default(), ProtocolVersion::V13);
    }

    #[test]
    fn test_mask_is_random_per_frame() {
        let a = encode(MessageType::Text, b"same", ProtocolVersion::V13).unwrap();
        let b = encode(MessageType::Text, b"same", ProtocolVersion::V13).unwrap();
        let c = encode(MessageType::Text, b"same", ProtocolVersion::V13).unwrap();
        // Three identical keys in a row is a 2^-64 event.
        assert!(a[2..6] != b[2..6] || b[2..6] != c[2..6]);
    }
}
