//! Local time server for trying the client.
//!
//! Demonstrates:
//! - Accepting upgrades on a single path (others get 404)
//! - Greeting every new connection
//! - Broadcasting the current time once per second
//! - Logging every message a client sends
//!
//! Usage:
//!   cargo run --example time_server
//!   cargo run --example time_server -- --addr 127.0.0.1:9292

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{Args, DEFAULT_PATH};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

// ============================================================================
// Constants
// ============================================================================

const GREETING: &str = "Welcome to the timeserver 3000";
const TICK: Duration = Duration::from_secs(1);

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

async fn run(args: Args) -> std::io::Result<()> {
    println!("=== Time Server ===\n");

    let listener = TcpListener::bind(&args.addr).await?;
    println!("[1] Listening on ws://{}{DEFAULT_PATH}\n", listener.local_addr()?);

    let (ticks, _) = broadcast::channel::<String>(16);

    let ticker = ticks.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        loop {
            interval.tick().await;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            // No receivers simply means no clients.
            let _ = ticker.send(now.to_string());
        }
    });

    tokio::select! {
        result = accept_loop(listener, ticks) => result,
        () = common::wait_for_exit(args.no_wait) => Ok(()),
    }
}

async fn accept_loop(
    listener: TcpListener,
    ticks: broadcast::Sender<String>,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        println!("[+] {peer} connected");
        tokio::spawn(serve(stream, ticks.subscribe()));
    }
}

// ============================================================================
// Connection
// ============================================================================

async fn serve(stream: TcpStream, mut ticks: broadcast::Receiver<String>) {
    let callback = |request: &Request, response: Response| {
        println!("    {} {}", request.method(), request.uri());
        for (name, value) in request.headers() {
            println!("    {name}: {}", value.to_str().unwrap_or("<binary>"));
        }

        if request.uri().path() == DEFAULT_PATH {
            Ok(response)
        } else {
            let mut error = ErrorResponse::new(Some("Not Found".to_string()));
            *error.status_mut() = StatusCode::NOT_FOUND;
            Err(error)
        }
    };

    let socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(e) => {
            println!("[!] Upgrade failed: {e}");
            return;
        }
    };
    println!("    open");

    let (mut sink, mut source) = socket.split();
    if sink.send(Message::text(GREETING)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            tick = ticks.recv() => match tick {
                Ok(now) => {
                    if sink.send(Message::text(now)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => println!("    received: {text}"),
                Some(Ok(Message::Binary(data))) => println!("    received: [{} bytes]", data.len()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    println!("[!] {e}");
                    break;
                }
            },
        }
    }

    println!("    closed");
}
