//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization
//! - Graceful exit handling

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// Address the time server listens on and the echo client connects to.
pub const DEFAULT_ADDR: &str = "127.0.0.1:9292";

/// Path the time server accepts upgrades on.
pub const DEFAULT_PATH: &str = "/test";

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
#[derive(Debug, Clone)]
pub struct Args {
    pub debug: bool,
    pub no_wait: bool,
    pub addr: String,
}

impl Args {
    /// Parse command-line arguments.
    ///
    /// `--addr <host:port>` overrides [`DEFAULT_ADDR`].
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let addr = args
            .iter()
            .position(|a| a == "--addr")
            .and_then(|i| args.get(i + 1))
            .cloned()
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            no_wait: args.iter().any(|a| a == "--no-wait"),
            addr,
        }
    }

    /// Returns the WebSocket URL for the configured address.
    pub fn url(&self) -> String {
        format!("ws://{}{DEFAULT_PATH}", self.addr)
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
///
/// `RUST_LOG` takes precedence over the `--debug` flag.
pub fn init_logging(debug: bool) {
    let fallback = if debug {
        "wsock_client=debug"
    } else {
        "wsock_client=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Wait for Ctrl+C or skip if `--no-wait` flag is set.
pub async fn wait_for_exit(no_wait: bool) {
    if no_wait {
        println!("[--no-wait] Skipping wait");
        return;
    }

    println!("Press Ctrl+C to exit...");
    tokio::signal::ctrl_c().await.ok();
}
