//! Connection state machine.
//!
//! A [`Client`] owns one connection at a time. Each successful
//! [`start`](Client::start) creates a session: the write half of the
//! transport, the task reading from the other half, and the protocol
//! version negotiated by the handshake.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start──▶ Connecting ──▶ Handshaking ──▶ Open ──stop──▶ Stopped
//!   ▲                 │               │                            │
//!   └──── failure ────┴───────────────┘                            │
//!                                                  start ◀─────────┘
//! ```
//!
//! # Concurrency
//!
//! | Lock | Guards | Held across `.await` |
//! |------|--------|----------------------|
//! | `lifecycle` | `start` / `stop` and the events they fire | yes |
//! | `session` | presence of the open session | no |
//! | session `writer` | the transport write half | yes |
//!
//! `start` keeps `lifecycle` until `connect` and `start` have run, and
//! `stop` keeps it until `stop` has run, so a concurrent `stop` waits for a
//! start in progress. Handlers fired under the lock act as its holder: a
//! handler may call back into `start` or `stop` without waiting on itself.
//! Events fired by the receive task are outside the lock.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{
    FrameDecoder, Handshake, Message, MessageType, ProtocolVersion, encode,
};
use crate::transport::{TlsOptions, Transport, TransportReader, TransportWriter};

use super::builder::ClientBuilder;
use super::events::{
    Event, EventDispatcher, EventKind, Handler, as_lifecycle_owner, handler, lifecycle_owner,
};
use super::options::ClientOptions;

// ============================================================================
// Constants
// ============================================================================

/// Bytes requested per socket read in the receive task.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Close status sent on a client-initiated stop (normal closure).
const CLOSE_NORMAL: u16 = 1000;

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable lifecycle state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Never started, or the last start failed.
    #[default]
    Idle,
    /// Opening the TCP/TLS transport.
    Connecting,
    /// Transport open, waiting for the upgrade response.
    Handshaking,
    /// Upgrade accepted; messages flow.
    Open,
    /// Stopped after having been open.
    Stopped,
}

impl ConnectionState {
    /// Returns the state name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Resources of one open connection.
struct Session {
    /// Shared write half.
    writer: Arc<AsyncMutex<TransportWriter>>,
    /// Receive task handle.
    receiver: JoinHandle<()>,
    /// Version negotiated during the handshake.
    version: ProtocolVersion,
    /// Remote address.
    peer: SocketAddr,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

// ============================================================================
// ClientInner
// ============================================================================

/// Shared state behind every [`Client`] handle.
pub(crate) struct ClientInner {
    /// Target URL.
    url: Url,
    /// Immutable configuration.
    options: ClientOptions,
    /// TLS settings derived from `options`.
    tls: TlsOptions,
    /// Handler table, shared with the receive task.
    dispatcher: Arc<EventDispatcher>,
    /// Serializes `start` and `stop`.
    lifecycle: AsyncMutex<()>,
    /// Current lifecycle state.
    state: Mutex<ConnectionState>,
    /// Open session, if any.
    session: Mutex<Option<Session>>,
}

impl ClientInner {
    /// Identity used to mark tasks acting under this client's lifecycle lock.
    fn id(&self) -> usize {
        std::ptr::from_ref(self) as usize
    }

    /// Takes the lifecycle lock, unless the current task already acts as
    /// its holder.
    async fn lock_lifecycle(&self) -> Option<AsyncMutexGuard<'_, ()>> {
        if lifecycle_owner() == Some(self.id()) {
            return None;
        }
        Some(self.lifecycle.lock().await)
    }

    /// Fires `event` with the lifecycle lock held on the handler's behalf.
    async fn trigger_owned(&self, event: Event) {
        as_lifecycle_owner(self.id(), self.dispatcher.trigger(event)).await;
    }

    /// Returns `true` if the open session is the one writing through
    /// `writer`.
    fn is_current(&self, writer: &Arc<AsyncMutex<TransportWriter>>) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| Arc::ptr_eq(&session.writer, writer))
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            trace!(from = %previous, to = %state, "State transition");
        }
    }

    /// Opens the transport, runs the handshake and spawns a gated receive
    /// task. The returned sender releases the task.
    async fn establish(&self) -> Result<(Session, oneshot::Sender<()>)> {
        self.set_state(ConnectionState::Connecting);
        debug!(url = %self.url, "Connecting");

        let transport = Transport::open(&self.url, &self.tls).await?;
        let peer = transport.peer_addr();
        let (mut reader, mut writer) = transport.split();

        self.set_state(ConnectionState::Handshaking);
        let version =
            match perform_handshake(&self.url, &self.options.headers, &mut reader, &mut writer)
                .await
            {
                Ok(version) => version,
                Err(e) => {
                    writer.close().await;
                    return Err(e);
                }
            };

        let decoder =
            FrameDecoder::new(version).with_max_message_size(self.options.max_message_size);
        let (gate_tx, gate_rx) = oneshot::channel();
        let receiver = tokio::spawn(receive_loop(
            reader,
            decoder,
            Arc::clone(&self.dispatcher),
            gate_rx,
        ));

        let session = Session {
            writer: Arc::new(AsyncMutex::new(writer)),
            receiver,
            version,
            peer,
        };
        Ok((session, gate_tx))
    }

    /// Stops the receive task and closes the transport.
    ///
    /// Returns `false` if there was no session. Caller acts under
    /// `lifecycle`.
    async fn teardown(&self) -> bool {
        let Some(mut session) = self.session.lock().take() else {
            return false;
        };

        session.receiver.abort();
        if let Err(e) = (&mut session.receiver).await
            && e.is_panic()
        {
            warn!(url = %self.url, "Receive task panicked");
        }

        {
            let mut writer = session.writer.lock().await;
            if let Ok(frame) = encode(
                MessageType::Close,
                &CLOSE_NORMAL.to_be_bytes(),
                session.version,
            ) && let Err(e) = writer.write_all(&frame).await
            {
                debug!(error = %e, "Close frame not delivered");
            }
            writer.close().await;
        }

        self.set_state(ConnectionState::Stopped);
        info!(url = %self.url, peer = %session.peer, "Connection stopped");
        true
    }
}

// ============================================================================
// Client
// ============================================================================

/// A WebSocket client for a single URL.
///
/// Cloning is cheap; all clones drive the same connection. Dropping the
/// last clone aborts the receive task and closes the transport.
///
/// # Example
///
/// ```no_run
/// use wsock_client::Client;
///
/// # async fn example() -> wsock_client::Result<()> {
/// let client = Client::builder("ws://127.0.0.1:9001/")
///     .header("Authorization", "Bearer token")
///     .build()?;
///
/// client.on_receive(|message| async move {
///     println!("{:?}", message.as_text());
/// });
///
/// if client.start().await {
///     client.send_text("hello").await;
/// }
/// client.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .field("dispatcher", &self.inner.dispatcher)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Constructors
// ============================================================================

impl Client {
    /// Creates a builder for a client connecting to `url`.
    #[inline]
    #[must_use]
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    /// Creates an idle client with the default `ping` and `disconnect`
    /// handlers installed.
    pub(crate) fn new(url: Url, options: ClientOptions) -> Self {
        let tls = options.tls_options();
        let client = Self {
            inner: Arc::new(ClientInner {
                url,
                options,
                tls,
                dispatcher: Arc::new(EventDispatcher::new()),
                lifecycle: AsyncMutex::new(()),
                state: Mutex::new(ConnectionState::Idle),
                session: Mutex::new(None),
            }),
        };

        for kind in [EventKind::Ping, EventKind::Disconnect] {
            client.use_default_handler(kind);
        }

        debug!(url = %client.inner.url, "Client created");
        client
    }

    /// Returns a handle that does not keep the client alive.
    ///
    /// Handlers that need the client should capture this instead of a
    /// [`Client`] clone, which would form a reference cycle through the
    /// handler table.
    #[inline]
    #[must_use]
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

// ============================================================================
// Client - Accessors
// ============================================================================

impl Client {
    /// Returns the target URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Returns `true` while a session is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Returns the remote address of the open session.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.session.lock().as_ref().map(|s| s.peer)
    }
}

// ============================================================================
// Client - Event Registration
// ============================================================================

impl Client {
    /// Registers the handler for `kind`, replacing the previous one.
    ///
    /// Replacing the `ping` or `disconnect` handler removes the automatic
    /// pong or stop.
    pub fn on<F, Fut>(&self, kind: EventKind, f: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(kind, handler(f));
    }

    /// Registers a `receive` handler taking the message directly.
    pub fn on_receive<F, Fut>(&self, f: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on(EventKind::Receive, move |event| {
            let pending = match event {
                Event::Receive(message) => Some(f(message)),
                _ => None,
            };
            async move {
                if let Some(pending) = pending {
                    pending.await;
                }
            }
        });
    }

    /// Restores the built-in behavior for `kind`.
    ///
    /// `ping` answers with a pong carrying the same payload and
    /// `disconnect` stops the client. Other kinds have no built-in handler
    /// and are cleared.
    pub fn use_default_handler(&self, kind: EventKind) {
        let weak = self.downgrade();
        match kind {
            EventKind::Ping => self.on(kind, move |event| {
                let client = weak.upgrade();
                async move {
                    if let (Event::Ping(message), Some(client)) = (event, client) {
                        client
                            .send(message.into_payload(), MessageType::Pong)
                            .await;
                    }
                }
            }),
            EventKind::Disconnect => self.on(kind, move |_| {
                let client = weak.upgrade();
                async move {
                    if let Some(client) = client {
                        client.stop().await;
                    }
                }
            }),
            _ => self.inner.dispatcher.clear(kind),
        }
    }

    /// Registers an already type-erased handler.
    pub(crate) fn register(&self, kind: EventKind, handler: Handler) {
        self.inner.dispatcher.on(kind, handler);
    }
}

// ============================================================================
// Client - Lifecycle
// ============================================================================

impl Client {
    /// Connects and performs the handshake.
    ///
    /// Restarts the connection if it is already open. Returns `false` when
    /// the transport cannot be opened or the server does not accept the
    /// upgrade; the error is logged.
    pub async fn start(&self) -> bool {
        match self.try_start().await {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %self.inner.url, error = %e, "Connection attempt failed");
                false
            }
        }
    }

    /// Like [`start`](Self::start), returning the failure.
    ///
    /// # Errors
    ///
    /// - [`Error::Connect`] if the transport cannot be opened
    /// - [`Error::HandshakeIncomplete`] if the server closes mid-handshake
    /// - [`Error::HandshakeRejected`] if the response does not accept the upgrade
    /// - [`Error::Io`] if writing the request fails
    /// - [`Error::NotConnected`] if a `connect` or `start` handler stopped
    ///   the connection before start completed
    pub async fn try_start(&self) -> Result<()> {
        let inner = &self.inner;

        let lifecycle = inner.lock_lifecycle().await;
        let restarted = inner.teardown().await;
        let established = match inner.establish().await {
            Ok((session, gate)) => {
                info!(url = %inner.url, peer = %session.peer, version = %session.version, "Connection open");
                let writer = Arc::clone(&session.writer);
                *inner.session.lock() = Some(session);
                inner.set_state(ConnectionState::Open);
                Ok((writer, gate))
            }
            Err(e) => {
                inner.set_state(ConnectionState::Idle);
                Err(e)
            }
        };

        if restarted {
            inner.trigger_owned(Event::Stop).await;
        }
        let (writer, gate) = established?;

        for event in [Event::Connect, Event::Start] {
            if !inner.is_current(&writer) {
                break;
            }
            inner.trigger_owned(event).await;
        }
        let current = inner.is_current(&writer);
        if current {
            // Fails only if the receive task was aborted meanwhile.
            let _ = gate.send(());
        }
        drop(lifecycle);

        if current {
            return Ok(());
        }

        // A handler stopped or restarted the connection during start.
        debug!(url = %inner.url, "Session replaced before start completed");
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Stops the connection.
    ///
    /// Returns `false` without side effects when not connected. Otherwise
    /// the receive task is stopped before the transport is closed, and the
    /// `stop` event has run by the time this returns. A start in progress
    /// on another task completes first, so no event of the stopped session
    /// fires after `stop` returns.
    pub async fn stop(&self) -> bool {
        let lifecycle = self.inner.lock_lifecycle().await;
        let stopped = self.inner.teardown().await;
        if stopped {
            self.inner.trigger_owned(Event::Stop).await;
        }
        drop(lifecycle);
        stopped
    }
}

// ============================================================================
// Client - Sending
// ============================================================================

impl Client {
    /// Sends one message frame.
    ///
    /// Returns `false` when not connected or when the frame cannot be
    /// encoded or written.
    pub async fn send(&self, payload: impl AsRef<[u8]>, kind: MessageType) -> bool {
        match self.try_send(payload, kind).await {
            Ok(_) => true,
            Err(Error::NotConnected) => {
                debug!(kind = %kind, "Send skipped, not connected");
                false
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Send failed");
                false
            }
        }
    }

    /// Sends a text message.
    #[inline]
    pub async fn send_text(&self, text: impl AsRef<str>) -> bool {
        self.send(text.as_ref(), MessageType::Text).await
    }

    /// Sends a binary message.
    #[inline]
    pub async fn send_binary(&self, data: impl AsRef<[u8]>) -> bool {
        self.send(data, MessageType::Binary).await
    }

    /// Like [`send`](Self::send), returning the encoded frame.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no session is open
    /// - [`Error::InvalidArgument`] if the payload cannot be encoded as `kind`
    /// - [`Error::Io`] if the write fails
    pub async fn try_send(&self, payload: impl AsRef<[u8]>, kind: MessageType) -> Result<Bytes> {
        let (writer, version) = {
            let session = self.inner.session.lock();
            let session = session.as_ref().ok_or(Error::NotConnected)?;
            (Arc::clone(&session.writer), session.version)
        };

        let frame = encode(kind, payload.as_ref(), version)?;
        writer.lock().await.write_all(&frame).await?;
        trace!(kind = %kind, bytes = frame.len(), "Frame written");

        self.inner
            .dispatcher
            .trigger(Event::Sent(frame.clone()))
            .await;
        Ok(frame)
    }
}

// ============================================================================
// WeakClient
// ============================================================================

/// Non-owning handle to a [`Client`].
#[derive(Clone)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    /// Returns the client if it is still alive.
    #[inline]
    #[must_use]
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

impl fmt::Debug for WeakClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakClient")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// ============================================================================
// Handshake & Receive Task
// ============================================================================

/// Writes the upgrade request and reads the response byte by byte.
///
/// Reading stops exactly at the header terminator; anything the server
/// sent after it stays buffered in `reader` for the receive task.
async fn perform_handshake(
    url: &Url,
    headers: &[(String, String)],
    reader: &mut TransportReader,
    writer: &mut TransportWriter,
) -> Result<ProtocolVersion> {
    let mut handshake = Handshake::new(url.clone(), headers.to_vec());
    writer.write_all(&handshake.request_bytes()).await?;
    trace!(key = handshake.key(), "Handshake request sent");

    while !handshake.is_finished() {
        match reader.read_byte().await? {
            Some(byte) => {
                handshake.feed(byte);
            }
            None => return Err(Error::handshake_incomplete(handshake.received())),
        }
    }

    let version = handshake.outcome()?;
    debug!(version = %version, "Handshake accepted");
    Ok(version)
}

/// Reads frames until the stream ends or breaks, then fires `disconnect`.
///
/// Waits on `gate` first so that inbound events never precede `connect`
/// and `start`.
async fn receive_loop(
    mut reader: TransportReader,
    mut decoder: FrameDecoder,
    dispatcher: Arc<EventDispatcher>,
    gate: oneshot::Receiver<()>,
) {
    if gate.await.is_err() {
        return;
    }

    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let reason = 'read: loop {
        let n = match reader.read_chunk(&mut buf).await {
            Ok(0) => break "end of stream",
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Read failed");
                break "read error";
            }
        };

        decoder.feed(&buf[..n]);
        loop {
            match decoder.next() {
                Ok(Some(message)) => {
                    let event = if message.kind() == MessageType::Ping {
                        Event::Ping(message)
                    } else {
                        Event::Receive(message)
                    };
                    dispatcher.trigger(event).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Inbound stream rejected");
                    break 'read "malformed frame";
                }
            }
        }
    };

    debug!(reason, buffered = decoder.buffered(), "Receive task finished");
    dispatcher.trigger(Event::Disconnect).await;
}

// ============================================================================
// Tests
// ============================================================================
