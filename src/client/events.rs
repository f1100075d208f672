//! Lifecycle events and their dispatcher.
//!
//! Every [`EventKind`] has at most one handler slot. Registering a handler
//! replaces whatever was there; an empty slot simply means the event is
//! ignored.
//!
//! # Dispatch
//!
//! [`EventDispatcher::trigger`] runs the handler on its own tokio task and
//! waits for it to finish. The caller therefore observes the handler's side
//! effects in trigger order, while a panicking handler only takes down its
//! own task.
//!
//! A handler dispatched by a `start` or `stop` that holds a client's
//! lifecycle lock inherits that ownership through a task-local, and so
//! does every event it triggers in turn.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::protocol::Message;

// ============================================================================
// Types
// ============================================================================

/// Type-erased async event handler.
pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

// ============================================================================
// Lifecycle Ownership
// ============================================================================

tokio::task_local! {
    /// Identity of the client whose lifecycle lock is held on behalf of the
    /// current task.
    static LIFECYCLE_OWNER: usize;
}

/// Returns the client identity whose lifecycle lock the current task may
/// act under, if any.
pub(crate) fn lifecycle_owner() -> Option<usize> {
    LIFECYCLE_OWNER.try_with(|owner| *owner).ok()
}

/// Runs `fut` as the holder of `owner`'s lifecycle lock.
pub(crate) async fn as_lifecycle_owner<F: Future>(owner: usize, fut: F) -> F::Output {
    LIFECYCLE_OWNER.scope(owner, fut).await
}

// ============================================================================
// EventKind
// ============================================================================

/// Names of the events a client emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Connection opened and the receive task is about to run.
    Start,
    /// Connection was stopped.
    Stop,
    /// Handshake completed.
    Connect,
    /// Receive task saw EOF, a read error or a malformed frame.
    Disconnect,
    /// Ping message received.
    Ping,
    /// Frame written to the server.
    Sent,
    /// Any non-ping message received.
    Receive,
}

impl EventKind {
    /// Number of event kinds.
    pub const COUNT: usize = 7;

    /// All kinds, in slot order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Start,
        Self::Stop,
        Self::Connect,
        Self::Disconnect,
        Self::Ping,
        Self::Sent,
        Self::Receive,
    ];

    /// Returns the table slot for this kind.
    #[inline]
    const fn slot(self) -> usize {
        self as usize
    }

    /// Returns the event name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Ping => "ping",
            Self::Sent => "sent",
            Self::Receive => "receive",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event
// ============================================================================

/// An event delivered to a handler, with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Connection opened.
    Start,
    /// Connection stopped.
    Stop,
    /// Handshake completed.
    Connect,
    /// Connection lost.
    Disconnect,
    /// Inbound ping message.
    Ping(Message),
    /// Encoded bytes of an outbound frame.
    Sent(Bytes),
    /// Inbound message (anything but ping).
    Receive(Message),
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Start => EventKind::Start,
            Self::Stop => EventKind::Stop,
            Self::Connect => EventKind::Connect,
            Self::Disconnect => EventKind::Disconnect,
            Self::Ping(_) => EventKind::Ping,
            Self::Sent(_) => EventKind::Sent,
            Self::Receive(_) => EventKind::Receive,
        }
    }
}

// ============================================================================
// EventDispatcher
// ============================================================================

/// Fixed table of event handlers.
pub struct EventDispatcher {
    handlers: RwLock<[Option<Handler>; EventKind::COUNT]>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let registered: Vec<&str> = EventKind::ALL
            .iter()
            .filter(|kind| handlers[kind.slot()].is_some())
            .map(|kind| kind.as_str())
            .collect();
        f.debug_struct("EventDispatcher")
            .field("registered", &registered)
            .finish()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with every slot empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Default::default()),
        }
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    pub fn on(&self, kind: EventKind, handler: Handler) {
        self.handlers.write()[kind.slot()] = Some(handler);
    }

    /// Empties the slot for `kind`.
    pub fn clear(&self, kind: EventKind) {
        self.handlers.write()[kind.slot()] = None;
    }

    /// Returns `true` if a handler is registered for `kind`.
    #[must_use]
    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.handlers.read()[kind.slot()].is_some()
    }

    /// Runs the handler for `event` and waits for it.
    ///
    /// Returns `true` if a handler ran to completion. A missing handler is
    /// a no-op; a panicking handler is logged and reported as `false`.
    pub async fn trigger(&self, event: Event) -> bool {
        let kind = event.kind();
        debug!(event = kind.as_str(), args = %Summary(&event), "Dispatching event");

        // Clone out of the lock so the handler may re-register.
        let Some(handler) = self.handlers.read()[kind.slot()].clone() else {
            return false;
        };

        let task = match lifecycle_owner() {
            Some(owner) => tokio::spawn(LIFECYCLE_OWNER.scope(owner, handler(event))),
            None => tokio::spawn(handler(event)),
        };

        match task.await {
            Ok(()) => true,
            Err(e) if e.is_panic() => {
                error!(event = kind.as_str(), "Event handler panicked");
                false
            }
            Err(_) => {
                debug!(event = kind.as_str(), "Event handler cancelled");
                false
            }
        }
    }
}

/// Compact rendering of event arguments for logs.
struct Summary<'a>(&'a Event);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Event::Ping(message) | Event::Receive(message) => write!(
                f,
                "[{} {} bytes]",
                message.kind(),
                message.payload().len()
            ),
            Event::Sent(bytes) => write!(f, "[{} bytes]", bytes.len()),
            _ => f.write_str("[]"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::protocol::MessageType;

    #[tokio::test]
    async fn test_trigger_without_handler_is_noop() {
        let dispatcher = EventDispatcher::new();
        assert!(!dispatcher.trigger(Event::Start).await);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let dispatcher = EventDispatcher::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        dispatcher.on(
            EventKind::Receive,
            handler(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        let counter = Arc::clone(&second);
        dispatcher.on(
            EventKind::Receive,
            handler(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        assert!(
            dispatcher
                .trigger(Event::Receive(Message::text("hi")))
                .await
        );
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trigger_waits_for_handler() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        dispatcher.on(
            EventKind::Receive,
            handler(move |event| {
                let log = Arc::clone(&log);
                async move {
                    tokio::task::yield_now().await;
                    if let Event::Receive(message) = event {
                        log.lock().push(message.as_text().unwrap_or_default().to_string());
                    }
                }
            }),
        );

        for text in ["a", "b", "c"] {
            dispatcher.trigger(Event::Receive(Message::text(text))).await;
        }
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.on(
            EventKind::Ping,
            handler(|_| async {
                panic!("handler failure");
            }),
        );
        let counter = Arc::clone(&calls);
        dispatcher.on(
            EventKind::Stop,
            handler(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        let ping = Message::new(MessageType::Ping, "x");
        assert!(!dispatcher.trigger(Event::Ping(ping)).await);
        assert!(dispatcher.trigger(Event::Stop).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_and_registered() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on(EventKind::Sent, handler(|_| async {}));
        assert!(dispatcher.is_registered(EventKind::Sent));
        assert!(!dispatcher.is_registered(EventKind::Start));
        dispatcher.clear(EventKind::Sent);
        assert!(!dispatcher.is_registered(EventKind::Sent));
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(Event::Sent(Bytes::new()).kind(), EventKind::Sent);
        assert_eq!(EventKind::Disconnect.to_string(), "disconnect");
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.slot(), i);
        }
    }

    #[tokio::test]
    async fn test_handler_inherits_lifecycle_owner() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        // The start handler triggers sent, so ownership crosses two spawns.
        let inner = Arc::clone(&dispatcher);
        let log = Arc::clone(&seen);
        dispatcher.on(
            EventKind::Start,
            handler(move |_| {
                let inner = Arc::clone(&inner);
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(("start", lifecycle_owner()));
                    inner.trigger(Event::Sent(Bytes::new())).await;
                }
            }),
        );
        let log = Arc::clone(&seen);
        dispatcher.on(
            EventKind::Sent,
            handler(move |_| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(("sent", lifecycle_owner()));
                }
            }),
        );

        as_lifecycle_owner(7, dispatcher.trigger(Event::Start)).await;
        dispatcher.trigger(Event::Start).await;

        assert_eq!(
            *seen.lock(),
            vec![
                ("start", Some(7)),
                ("sent", Some(7)),
                ("start", None),
                ("sent", None),
            ]
        );
        assert_eq!(lifecycle_owner(), None);
    }
}
