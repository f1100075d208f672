//! Automatic reconnection.
//!
//! A [`Supervisor`] takes over the `disconnect` event of a [`Client`]: the
//! receive task only signals the loss, and the supervisor task stops the
//! client and starts it again, waiting an exponentially growing delay
//! between failed attempts. Whenever the loop ends, because it gave up,
//! was cancelled or shut down, the default stop-on-disconnect handler is
//! put back.
//!
//! # Example
//!
//! ```no_run
//! use wsock_client::{Client, ReconnectConfig, Supervisor};
//!
//! # async fn example() -> wsock_client::Result<()> {
//! let client = Client::builder("ws://127.0.0.1:9001/").build()?;
//! let supervisor = Supervisor::spawn(&client, ReconnectConfig::default());
//!
//! // ... use the client ...
//!
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use backoff::backoff::Backoff as _;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{Client, WeakClient};
use super::events::EventKind;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

// ============================================================================
// ReconnectConfig
// ============================================================================

/// Reconnection strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the delay.
    pub max_backoff: Duration,
    /// Growth factor between delays.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    /// Sets the attempt limit.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the initial and maximum delay.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            // Attempts are counted by the supervisor.
            .with_max_elapsed_time(None)
            .build()
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Handle to a running reconnect loop.
///
/// Dropping the handle cancels the loop; the loop restores the default
/// `disconnect` handler on its way out. [`shutdown`](Self::shutdown) does
/// the same and waits for it.
#[derive(Debug)]
pub struct Supervisor {
    client: WeakClient,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Installs a `disconnect` handler on `client` and starts the loop.
    ///
    /// If the client is not connected yet, the loop connects it first.
    #[must_use]
    pub fn spawn(client: &Client, config: ReconnectConfig) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        client.on(EventKind::Disconnect, move |_| {
            let signal_tx = signal_tx.clone();
            async move {
                // Closed only once the loop has exited.
                let _ = signal_tx.send(());
            }
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            client.downgrade(),
            config,
            signal_rx,
            cancel.clone(),
        ));

        info!(url = %client.url(), "Reconnect supervisor started");
        Self {
            client: client.downgrade(),
            cancel,
            task: Some(task),
        }
    }

    /// Returns `true` while the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the loop and restores the default `disconnect` handler.
    ///
    /// The client's connection is left as it is.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            warn!("Reconnect supervisor panicked");
        }
        // Covers a loop that panicked before restoring.
        restore_default(&self.client);
        debug!("Reconnect supervisor shut down");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Reconnect Loop
// ============================================================================

/// How a reconnect phase ended.
enum Reconnect {
    Connected,
    GaveUp,
    Cancelled,
}

async fn run(
    client: WeakClient,
    config: ReconnectConfig,
    signals: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) {
    supervise(&client, config, signals, cancel).await;
    restore_default(&client);
}

/// Puts the stop-on-disconnect handler back on a still-alive client.
fn restore_default(client: &WeakClient) {
    if let Some(client) = client.upgrade() {
        client.use_default_handler(EventKind::Disconnect);
        debug!(url = %client.url(), "Default disconnect handler restored");
    }
}

async fn supervise(
    client: &WeakClient,
    config: ReconnectConfig,
    mut signals: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) {
    let mut backoff: ExponentialBackoff = config.clone().into();

    loop {
        let Some(current) = client.upgrade() else {
            debug!("Client dropped, supervisor exiting");
            return;
        };

        if !current.is_connected() {
            match reconnect(&current, &config, &mut backoff, &cancel).await {
                Reconnect::Connected => {}
                Reconnect::GaveUp | Reconnect::Cancelled => return,
            }
        }
        drop(current);

        tokio::select! {
            () = cancel.cancelled() => return,
            signal = signals.recv() => {
                if signal.is_none() {
                    return;
                }
            }
        }

        if let Some(current) = client.upgrade() {
            info!(url = %current.url(), "Connection lost, reconnecting");
            current.stop().await;
        }
    }
}

async fn reconnect(
    client: &Client,
    config: &ReconnectConfig,
    backoff: &mut ExponentialBackoff,
    cancel: &CancellationToken,
) -> Reconnect {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Reconnect::Cancelled;
        }

        attempt += 1;
        if client.start().await {
            backoff.reset();
            info!(url = %client.url(), attempt, "Reconnected");
            return Reconnect::Connected;
        }

        if let Some(max) = config.max_attempts
            && attempt >= max
        {
            warn!(url = %client.url(), attempts = attempt, "Giving up on reconnection");
            return Reconnect::GaveUp;
        }

        let Some(delay) = backoff.next_backoff() else {
            return Reconnect::GaveUp;
        };
        debug!(attempt, delay_ms = delay.as_millis(), "Retrying after delay");

        tokio::select! {
            () = cancel.cancelled() => return Reconnect::Cancelled,
            () = sleep(delay) => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
