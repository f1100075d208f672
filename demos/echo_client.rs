//! Client with automatic reconnection.
//!
//! Demonstrates:
//! - Building a client with an extra handshake header
//! - Handling `connect`, `receive` and `disconnect` events
//! - Keeping the connection alive with the reconnect supervisor
//! - Sending text from stdin
//!
//! Start the time server first, then:
//!
//! Usage:
//!   cargo run --example echo_client
//!   cargo run --example echo_client -- --debug
//!   cargo run --example echo_client -- --addr 127.0.0.1:9292 --no-wait

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use wsock_client::{Client, EventKind, ReconnectConfig, Result, Supervisor};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Echo Client ===\n");

    // ========================================================================
    // Build Client
    // ========================================================================

    println!("[1] Building client for {}...", args.url());

    let client = Client::builder(args.url())
        .header("WD_TOKEN", "FOO BAR BAZ")
        .on(EventKind::Connect, |_| async { println!("    ✓ Connected") })
        .build()?;

    client.on_receive(|message| async move {
        match message.as_text() {
            Some(text) => println!("    < {text}"),
            None => println!("    < [{} bytes]", message.payload().len()),
        }
    });

    println!("    ✓ Client ready\n");

    // ========================================================================
    // Supervise
    // ========================================================================

    println!("[2] Connecting (retrying every 1s until the server is up)...");

    let config = ReconnectConfig::default().with_backoff(Duration::from_secs(1), Duration::from_secs(1));
    let supervisor = Supervisor::spawn(&client, config);

    if args.no_wait {
        tokio::time::sleep(Duration::from_secs(3)).await;
    } else {
        println!("    Type a line to send it, Ctrl+C to exit.\n");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if !client.send_text(&line).await {
                            println!("    ✗ Not connected, dropped: {line}");
                        }
                    }
                    _ => break,
                },
            }
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    supervisor.shutdown().await;
    client.stop().await;
    println!("\n    ✓ Stopped");

    Ok(())
}
