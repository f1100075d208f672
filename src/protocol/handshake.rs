//! Client opening handshake (RFC 6455 Section 4).
//!
//! A [`Handshake`] is created per connection attempt. It renders the HTTP
//! Upgrade request and then consumes the server response incrementally:
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! Bytes are fed one at a time so the parser never reads past the blank
//! line that ends the response; whatever follows belongs to the frame
//! stream.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustc_hash::FxHashMap;
use sha1::{Digest, Sha1};
use url::Url;

use crate::error::{Error, Result};

use super::frame::ProtocolVersion;

// ============================================================================
// Constants
// ============================================================================

/// GUID appended to the key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Response header block size limit.
const MAX_RESPONSE_LEN: usize = 8 * 1024;

/// End of the HTTP header block.
const TERMINATOR: &[u8] = b"\r\n\r\n";

// ============================================================================
// URL helpers
// ============================================================================

/// Parses and checks a `ws://` or `wss://` URL.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if the URL does not parse, uses another
/// scheme, or has no host.
pub fn parse_ws_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::invalid_url(raw, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::invalid_url(
                raw,
                format!("unsupported scheme '{other}', expected ws or wss"),
            ));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::invalid_url(raw, "missing host"));
    }

    Ok(url)
}

/// Returns `true` when the URL requires TLS.
#[inline]
#[must_use]
pub fn is_secure(url: &Url) -> bool {
    url.scheme() == "wss"
}

/// Returns the `Host` header value (port omitted when default).
fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Returns the request target (path plus query).
fn request_target(url: &Url) -> String {
    let path = match url.path() {
        "" => "/",
        path => path,
    };
    match url.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}

/// Computes the `Sec-WebSocket-Accept` value expected for `key`.
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Generates a random base64-encoded 16-byte key.
fn generate_key() -> String {
    let key: [u8; 16] = rand::random();
    STANDARD.encode(key)
}

// ============================================================================
// Handshake
// ============================================================================

/// Handshake context for one connection attempt.
#[derive(Debug)]
pub struct Handshake {
    url: Url,
    headers: Vec<(String, String)>,
    key: String,
    version: ProtocolVersion,
    response: Vec<u8>,
    finished: bool,
    error: Option<String>,
}

impl Handshake {
    /// Creates a handshake for `url` carrying additional `headers`.
    #[must_use]
    pub fn new(url: Url, headers: Vec<(String, String)>) -> Self {
        Self::with_key(url, headers, generate_key())
    }

    /// Creates a handshake with a fixed key.
    pub(crate) fn with_key(url: Url, headers: Vec<(String, String)>, key: String) -> Self {
        Self {
            url,
            headers,
            key,
            version: ProtocolVersion::V13,
            response: Vec::with_capacity(256),
            finished: false,
            error: None,
        }
    }

    /// Returns the target URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the client key sent in `Sec-WebSocket-Key`.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the protocol version in effect for this connection.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Renders the HTTP Upgrade request.
    #[must_use]
    pub fn request_bytes(&self) -> Vec<u8> {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: {}\r\n",
            request_target(&self.url),
            host_header(&self.url),
            self.key,
            self.version,
        );

        for (name, value) in &self.headers {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }

        request.push_str("\r\n");
        request.into_bytes()
    }

    /// Feeds one response byte.
    ///
    /// Returns `false` without consuming the byte once the handshake has
    /// finished.
    pub fn feed(&mut self, byte: u8) -> bool {
        if self.finished {
            return false;
        }

        self.response.push(byte);

        if self.response.ends_with(TERMINATOR) {
            self.finished = true;
            self.error = self.validate().err();
        } else if self.response.len() >= MAX_RESPONSE_LEN {
            self.finished = true;
            self.error = Some(format!(
                "response headers exceed {MAX_RESPONSE_LEN} bytes"
            ));
        }

        true
    }

    /// Feeds a slice, stopping at the end of the response.
    ///
    /// Returns how many bytes were consumed; the rest belongs to the frame
    /// stream.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> usize {
        bytes.iter().take_while(|&&b| self.feed(b)).count()
    }

    /// Returns the number of response bytes consumed so far.
    #[inline]
    #[must_use]
    pub fn received(&self) -> usize {
        self.response.len()
    }

    /// Returns `true` once the full response header block was fed.
    #[inline]
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns `true` if the finished response accepted the upgrade.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.finished && self.error.is_none()
    }

    /// Returns the rejection diagnostic, if any.
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Converts the finished state into a result.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeIncomplete`] if not finished
    /// - [`Error::HandshakeRejected`] if finished but invalid
    pub fn outcome(&self) -> Result<ProtocolVersion> {
        if !self.finished {
            return Err(Error::handshake_incomplete(self.response.len()));
        }
        match &self.error {
            Some(message) => Err(Error::handshake_rejected(message.clone())),
            None => Ok(self.version),
        }
    }

    /// Checks the complete response against the request.
    fn validate(&self) -> std::result::Result<(), String> {
        let text = std::str::from_utf8(&self.response)
            .map_err(|_| "response headers are not valid UTF-8".to_string())?;

        let mut lines = text.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let status = parse_status_line(status_line)?;

        let headers: FxHashMap<String, String> = lines
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        if status != 101 {
            return Err(format!("expected status 101, got '{status_line}'"));
        }

        let upgrade = headers
            .get("upgrade")
            .ok_or("missing Upgrade header")?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(format!("Upgrade header must be 'websocket', got '{upgrade}'"));
        }

        let connection = headers
            .get("connection")
            .ok_or("missing Connection header")?;
        let has_upgrade = connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        if !has_upgrade {
            return Err(format!(
                "Connection header must contain 'Upgrade', got '{connection}'"
            ));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or("missing Sec-WebSocket-Accept header")?;
        let expected = compute_accept_key(&self.key);
        if *accept != expected {
            return Err(format!(
                "invalid Sec-WebSocket-Accept: expected {expected}, got {accept}"
            ));
        }

        Ok(())
    }
}

/// Extracts the status code from `HTTP/1.1 101 Switching Protocols`.
fn parse_status_line(line: &str) -> std::result::Result<u16, String> {
    let mut parts = line.splitn(3, ' ');
    let proto = parts.next().unwrap_or_default();
    if !proto.starts_with("HTTP/1.") {
        return Err(format!("malformed status line '{line}'"));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| format!("malformed status line '{line}'"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    fn handshake(url: &str) -> Handshake {
        Handshake::with_key(parse_ws_url(url).unwrap(), Vec::new(), KEY.to_string())
    }

    fn response(accept: &str) -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             \r\n"
        )
    }

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(compute_accept_key(KEY), ACCEPT);
    }

    #[test]
    fn test_parse_ws_url() {
        assert!(parse_ws_url("ws://localhost:9292/test").is_ok());
        assert!(parse_ws_url("wss://example.com").is_ok());
        assert!(matches!(
            parse_ws_url("http://example.com"),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_ws_url("not a url"),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_request_bytes() {
        let url = parse_ws_url("ws://localhost:9292/test?room=1").unwrap();
        let hs = Handshake::with_key(
            url,
            vec![("WD_TOKEN".to_string(), "FOO BAR BAZ".to_string())],
            KEY.to_string(),
        );
        let request = String::from_utf8(hs.request_bytes()).unwrap();

        assert!(request.starts_with("GET /test?room=1 HTTP/1.1\r\n"));
        assert!(request.contains("Host: localhost:9292\r\n"));
        assert!(request.contains("Upgrade: websocket\r\n"));
        assert!(request.contains("Connection: Upgrade\r\n"));
        assert!(request.contains(&format!("Sec-WebSocket-Key: {KEY}\r\n")));
        assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(request.contains("WD_TOKEN: FOO BAR BAZ\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_host_header_omits_default_port() {
        let hs = handshake("wss://example.com:443/");
        let request = String::from_utf8(hs.request_bytes()).unwrap();
        assert!(request.contains("Host: example.com\r\n"));
        assert!(request.starts_with("GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn test_finishes_exactly_at_terminator() {
        let mut hs = handshake("ws://localhost/");
        let bytes = response(ACCEPT).into_bytes();

        for (i, byte) in bytes.iter().enumerate() {
            assert!(!hs.is_finished(), "finished early at byte {i}");
            assert!(hs.feed(*byte));
        }

        assert!(hs.is_finished());
        assert!(hs.is_valid(), "{:?}", hs.error());
        assert_eq!(hs.outcome().unwrap(), ProtocolVersion::V13);
        assert!(!hs.feed(0x81));
        assert_eq!(hs.received(), bytes.len());
    }

    #[test]
    fn test_feed_slice_leaves_frame_bytes() {
        let mut hs = handshake("ws://localhost/");
        let mut bytes = response(ACCEPT).into_bytes();
        let header_len = bytes.len();
        bytes.extend_from_slice(&[0x81, 0x01, b'x']);

        assert_eq!(hs.feed_slice(&bytes), header_len);
        assert!(hs.is_valid());
    }

    #[test]
    fn test_wrong_accept_is_rejected() {
        let mut hs = handshake("ws://localhost/");
        hs.feed_slice(response("bogus=").as_bytes());
        assert!(hs.is_finished());
        assert!(!hs.is_valid());
        assert!(hs.error().unwrap().contains("Sec-WebSocket-Accept"));
        assert!(matches!(hs.outcome(), Err(Error::HandshakeRejected { .. })));
    }

    #[test]
    fn test_non_101_is_rejected() {
        let mut hs = handshake("ws://localhost/");
        hs.feed_slice(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        assert!(hs.is_finished());
        assert!(hs.error().unwrap().contains("404"));
    }

    #[test]
    fn test_missing_upgrade_is_rejected() {
        let mut hs = handshake("ws://localhost/");
        let body = format!(
            "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {ACCEPT}\r\n\r\n"
        );
        hs.feed_slice(body.as_bytes());
        assert_eq!(hs.error(), Some("missing Upgrade header"));
    }

    #[test]
    fn test_unfinished_outcome_is_incomplete() {
        let mut hs = handshake("ws://localhost/");
        hs.feed_slice(b"HTTP/1.1 101 Switching");
        assert!(!hs.is_finished());
        assert!(matches!(
            hs.outcome(),
            Err(Error::HandshakeIncomplete { received: 22 })
        ));
    }

    #[test]
    fn test_oversized_response_finishes_invalid() {
        let mut hs = handshake("ws://localhost/");
        let junk = vec![b'a'; MAX_RESPONSE_LEN + 10];
        let consumed = hs.feed_slice(&junk);
        assert_eq!(consumed, MAX_RESPONSE_LEN);
        assert!(hs.is_finished());
        assert!(!hs.is_valid());
    }

    #[test]
    fn test_header_names_case_insensitive() {
        let mut hs = handshake("ws://localhost/");
        let body = format!(
            "HTTP/1.1 101 Switching Protocols\r\nupgrade: WebSocket\r\nconnection: keep-alive, upgrade\r\nsec-websocket-accept: {ACCEPT}\r\n\r\n"
        );
        hs.feed_slice(body.as_bytes());
        assert!(hs.is_valid(), "{:?}", hs.error());
    }
}
