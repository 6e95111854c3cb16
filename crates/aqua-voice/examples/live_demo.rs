//! Live Session Demo — hands-free duplex conversation over WebSocket.
//!
//! Connects to the live endpoint, streams microphone audio gated by VAD,
//! and plays synthesized replies as they arrive. Speaking over the
//! assistant interrupts it.
//!
//! Set `AQUA_LIVE_URL` in `.env` (defaults to `ws://127.0.0.1:5000/ws/live`).
//! Press Ctrl+C to stop.

use aqua_voice::{DisplaySink, LiveConfig, LiveSession, Role};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

struct ConsoleDisplay;

impl DisplaySink for ConsoleDisplay {
    fn entry(&self, role: Role, text: &str) {
        match role {
            Role::User => info!("🗣️  You: {}", text),
            Role::Assistant => info!("💬 Aqua: {}", text),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = LiveConfig::from_env()
        .unwrap_or_else(|_| LiveConfig::new("ws://127.0.0.1:5000/ws/live"));

    info!("Live Session Demo — speak naturally, pauses over 2s send your turn.");
    info!("Endpoint: {}", config.url);

    let mut session = LiveSession::connect(config, Arc::new(ConsoleDisplay)).await?;
    let handle = session.handle();

    // Print status transitions as they happen.
    let mut status_rx = session.status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            info!("status: {:?}", *status_rx.borrow_and_update());
        }
    });

    // Ctrl+C ends the session cleanly.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            handle.close();
        }
    });

    session.run().await?;
    info!("session ended ({} frames failed to decode)", session.decode_failures());
    Ok(())
}
