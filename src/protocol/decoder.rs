//! Incremental inbound frame decoder.
//!
//! The decoder owns a byte buffer that persists across reads. Callers
//! [`feed`](FrameDecoder::feed) whatever the transport produced and then
//! drain [`next`](FrameDecoder::next) until it returns `Ok(None)`; any
//! partial frame stays buffered for the following feed.
//!
//! Fragmented data messages are reassembled before they are yielded.
//! Control frames may arrive between fragments and are yielded as soon as
//! they are complete.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::error::{Error, Result};

use super::frame::{
    FIN_BIT, LEN_16_MARKER, LEN_64_MARKER, LEN_BITS, MASK_BIT, MAX_CONTROL_PAYLOAD, Message,
    MessageType, OPCODE_BITS, ProtocolVersion, RSV_BITS, apply_mask,
};

// ============================================================================
// Constants
// ============================================================================

/// Default upper bound for one reassembled message (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// Types
// ============================================================================

/// Parsed fixed part of a frame header.
#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    fin: bool,
    kind: MessageType,
    mask: Option<[u8; 4]>,
    header_len: usize,
    payload_len: usize,
}

/// A data message whose final fragment has not arrived yet.
#[derive(Debug)]
struct PartialMessage {
    kind: MessageType,
    payload: BytesMut,
}

// ============================================================================
// FrameDecoder
// ============================================================================

/// Stateful decoder turning wire bytes into [`Message`]s.
#[derive(Debug)]
pub struct FrameDecoder {
    version: ProtocolVersion,
    buffer: BytesMut,
    partial: Option<PartialMessage>,
    max_message_size: usize,
}

impl FrameDecoder {
    /// Creates a decoder for the negotiated protocol version.
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            buffer: BytesMut::with_capacity(4096),
            partial: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Sets the largest message (after reassembly) the decoder accepts.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Returns the protocol version this decoder was built for.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Returns the number of buffered bytes not yet decoded.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends raw bytes read from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pops one complete message if available.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Leftover bytes stay
    /// buffered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] when the buffered bytes violate the
    /// framing rules. The decoder should be discarded afterwards.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Message>> {
        loop {
            let Some(header) = self.parse_header()? else {
                return Ok(None);
            };

            let frame_len = header.header_len + header.payload_len;
            if self.buffer.len() < frame_len {
                self.buffer.reserve(frame_len - self.buffer.len());
                return Ok(None);
            }

            self.buffer.advance(header.header_len);
            let mut payload = self.buffer.split_to(header.payload_len);
            if let Some(mask) = header.mask {
                apply_mask(&mut payload, mask);
            }

            trace!(
                kind = %header.kind,
                fin = header.fin,
                len = header.payload_len,
                "Frame decoded"
            );

            if header.kind.is_control() {
                return Ok(Some(Message::new(header.kind, payload.freeze())));
            }

            if let Some(message) = self.assemble(header, payload)? {
                return Ok(Some(message));
            }
        }
    }

    /// Reads and validates the header at the front of the buffer.
    ///
    /// Returns `Ok(None)` if the header itself is not complete yet. Does not
    /// consume anything.
    fn parse_header(&self) -> Result<Option<FrameHeader>> {
        let buf = &self.buffer[..];
        if buf.len() < 2 {
            return Ok(None);
        }

        let first = buf[0];
        let second = buf[1];

        if first & RSV_BITS != 0 {
            return Err(Error::malformed("reserved bits set without extension"));
        }

        let opcode = first & OPCODE_BITS;
        let kind = MessageType::from_opcode(opcode)
            .ok_or_else(|| Error::malformed(format!("reserved opcode 0x{opcode:X}")))?;
        let fin = first & FIN_BIT != 0;
        let masked = second & MASK_BIT != 0;
        let short_len = second & LEN_BITS;

        if kind.is_control() {
            if !fin {
                return Err(Error::malformed(format!("fragmented {kind} frame")));
            }
            if usize::from(short_len) > MAX_CONTROL_PAYLOAD {
                return Err(Error::malformed(format!(
                    "{kind} frame payload exceeds {MAX_CONTROL_PAYLOAD} bytes"
                )));
            }
        }

        let (payload_len, mut offset) = match short_len {
            LEN_16_MARKER => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            LEN_64_MARKER => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(Error::malformed("64-bit payload length has high bit set"));
                }
                (len, 10)
            }
            len => (u64::from(len), 2),
        };

        let already = match (&self.partial, kind) {
            (Some(partial), MessageType::Continuation) => partial.payload.len() as u64,
            _ => 0,
        };
        if payload_len.saturating_add(already) > self.max_message_size as u64 {
            return Err(Error::malformed(format!(
                "message of {} bytes exceeds limit of {}",
                payload_len.saturating_add(already),
                self.max_message_size
            )));
        }

        let mask = if masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[offset..offset + 4]);
            offset += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some(FrameHeader {
            fin,
            kind,
            mask,
            header_len: offset,
            payload_len: payload_len as usize,
        }))
    }

    /// Folds one data frame into the fragment state.
    ///
    /// Returns the completed message when `header.fin` closes it.
    fn assemble(&mut self, header: FrameHeader, payload: BytesMut) -> Result<Option<Message>> {
        if header.kind == MessageType::Continuation {
            let Some(partial) = self.partial.as_mut() else {
                return Err(Error::malformed(
                    "continuation frame without a started message",
                ));
            };
            partial.payload.extend_from_slice(&payload);
            if !header.fin {
                return Ok(None);
            }
            return match self.partial.take() {
                Some(done) => finish(done.kind, done.payload).map(Some),
                None => Ok(None),
            };
        }

        if let Some(partial) = &self.partial {
            return Err(Error::malformed(format!(
                "{} frame while a fragmented {} message is in progress",
                header.kind, partial.kind
            )));
        }

        if header.fin {
            return finish(header.kind, payload).map(Some);
        }

        self.partial = Some(PartialMessage {
            kind: header.kind,
            payload,
        });
        Ok(None)
    }
}

/// Builds the final message, checking text payloads for UTF-8.
fn finish(kind: MessageType, payload: BytesMut) -> Result<Message> {
    if kind == MessageType::Text && std::str::from_utf8(&payload).is_err() {
        return Err(Error::malformed("text message is not valid UTF-8"));
    }
    Ok(Message::new(kind, payload.freeze()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::BufMut;
    use proptest::prelude::*;

    use crate::protocol::frame::encode;

    /// Builds an unmasked server frame.
    fn server_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(if fin { FIN_BIT } else { 0 } | opcode);
        match payload.len() {
            len if len <= 125 => buf.put_u8(len as u8),
            len if len <= 65535 => {
                buf.put_u8(LEN_16_MARKER);
                buf.put_u16(len as u16);
            }
            len => {
                buf.put_u8(LEN_64_MARKER);
                buf.put_u64(len as u64);
            }
        }
        buf.put_slice(payload);
        buf.to_vec()
    }

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(ProtocolVersion::V13)
    }

    #[test]
    fn test_empty_buffer_yields_none() {
        let mut dec = decoder();
        assert!(dec.next().unwrap().is_none());
    }

    #[test]
    fn test_single_text_frame() {
        let mut dec = decoder();
        dec.feed(&server_frame(true, 0x1, b"hello"));
        let msg = dec.next().unwrap().unwrap();
        assert_eq!(msg.kind(), MessageType::Text);
        assert_eq!(msg.as_text(), Some("hello"));
        assert!(dec.next().unwrap().is_none());
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_partial_frame_is_kept() {
        let frame = server_frame(true, 0x2, &[7; 300]);
        let mut dec = decoder();
        dec.feed(&frame[..3]);
        assert!(dec.next().unwrap().is_none());
        assert_eq!(dec.buffered(), 3);
        dec.feed(&frame[3..]);
        let msg = dec.next().unwrap().unwrap();
        assert_eq!(msg.payload().len(), 300);
    }

    #[test]
    fn test_fragmented_message_with_interleaved_ping() {
        let mut bytes = server_frame(false, 0x1, b"Hel");
        bytes.extend(server_frame(true, 0x9, b"x"));
        bytes.extend(server_frame(false, 0x0, b"lo "));
        bytes.extend(server_frame(true, 0x0, b"world"));

        let mut dec = decoder();
        dec.feed(&bytes);

        let ping = dec.next().unwrap().unwrap();
        assert_eq!(ping.kind(), MessageType::Ping);
        assert_eq!(&ping.payload()[..], b"x");

        let text = dec.next().unwrap().unwrap();
        assert_eq!(text.kind(), MessageType::Text);
        assert_eq!(text.as_text(), Some("Hello world"));

        assert!(dec.next().unwrap().is_none());
    }

    #[test]
    fn test_several_messages_in_one_feed() {
        let mut bytes = server_frame(true, 0x1, b"one");
        bytes.extend(server_frame(true, 0x2, b"two"));
        bytes.extend(server_frame(true, 0x8, &[0x03, 0xE8]));

        let mut dec = decoder();
        dec.feed(&bytes);
        assert_eq!(dec.next().unwrap().unwrap().kind(), MessageType::Text);
        assert_eq!(dec.next().unwrap().unwrap().kind(), MessageType::Binary);
        assert_eq!(dec.next().unwrap().unwrap().kind(), MessageType::Close);
        assert!(dec.next().unwrap().is_none());
    }

    #[test]
    fn test_reserved_opcode_is_malformed() {
        let mut dec = decoder();
        dec.feed(&server_frame(true, 0x3, b""));
        assert!(matches!(dec.next(), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_reserved_bits_are_malformed() {
        let mut dec = decoder();
        dec.feed(&[0xC1, 0x00]);
        assert!(matches!(dec.next(), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_fragmented_control_is_malformed() {
        let mut dec = decoder();
        dec.feed(&server_frame(false, 0x9, b"x"));
        assert!(matches!(dec.next(), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_orphan_continuation_is_malformed() {
        let mut dec = decoder();
        dec.feed(&server_frame(true, 0x0, b"x"));
        assert!(matches!(dec.next(), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_new_data_frame_during_fragment_is_malformed() {
        let mut bytes = server_frame(false, 0x1, b"a");
        bytes.extend(server_frame(true, 0x2, b"b"));
        let mut dec = decoder();
        dec.feed(&bytes);
        assert!(matches!(dec.next(), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_length_overflow_is_malformed() {
        let mut dec = decoder();
        dec.feed(&[0x82, 0x7F, 0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(dec.next(), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_message_size_limit() {
        let mut dec = decoder().with_max_message_size(4);
        dec.feed(&server_frame(true, 0x2, b"12345"));
        assert!(matches!(dec.next(), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_limit_applies_to_reassembled_size() {
        let mut bytes = server_frame(false, 0x2, b"123");
        bytes.extend(server_frame(true, 0x0, b"456"));
        let mut dec = decoder().with_max_message_size(5);
        dec.feed(&bytes);
        assert!(matches!(dec.next(), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_invalid_utf8_text_is_malformed() {
        let mut dec = decoder();
        dec.feed(&server_frame(true, 0x1, &[0xff, 0xfe]));
        assert!(matches!(dec.next(), Err(Error::MalformedFrame { .. })));
    }

    #[test]
    fn test_masked_inbound_frame_is_unmasked() {
        let encoded = encode(MessageType::Text, b"masked", ProtocolVersion::V13).unwrap();
        let mut dec = decoder();
        dec.feed(&encoded);
        assert_eq!(dec.next().unwrap().unwrap().as_text(), Some("masked"));
    }

    #[test]
    fn test_round_trip_across_length_boundaries() {
        let sizes = [0usize, 1, 125, 126, 127, 65535, 65536, 70000];
        let mut wire = Vec::new();
        let mut expected = Vec::new();
        for (i, size) in sizes.iter().enumerate() {
            let kind = if i % 2 == 0 {
                MessageType::Binary
            } else {
                MessageType::Text
            };
            let payload: Vec<u8> = (0..*size).map(|n| b'a' + (n % 26) as u8).collect();
            wire.extend_from_slice(&encode(kind, &payload, ProtocolVersion::V13).unwrap());
            expected.push(Message::new(kind, payload));
        }

        let mut dec = decoder();
        dec.feed(&wire);
        for want in expected {
            assert_eq!(dec.next().unwrap().unwrap(), want);
        }
        assert!(dec.next().unwrap().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_split_feed_matches_whole_feed(
            payload in proptest::collection::vec(any::<u8>(), 0..70_000),
            split in any::<prop::sample::Index>(),
        ) {
            let wire = encode(MessageType::Binary, &payload, ProtocolVersion::V13).unwrap();
            let at = split.index(wire.len() + 1);

            let mut whole = decoder();
            whole.feed(&wire);
            let expected = whole.next().unwrap().unwrap();

            let mut parts = decoder();
            parts.feed(&wire[..at]);
            let early = parts.next().unwrap();
            if at < wire.len() {
                prop_assert!(early.is_none());
                parts.feed(&wire[at..]);
                prop_assert_eq!(parts.next().unwrap().unwrap(), expected);
            } else {
                prop_assert_eq!(early.unwrap(), expected);
            }
        }
    }
}
