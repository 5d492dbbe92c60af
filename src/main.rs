//! chat-relay server binary.
//!
//! A WebSocket relay that fans chat messages out to every connected
//! client and announces joins and departures.

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use chat_relay::server::{RelayState, router};
use chat_relay::storage::Storage;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path = std::env::var("RELAY_DB").unwrap_or_else(|_| "chat-relay.db".to_string());
    let storage = match Storage::open(Path::new(&db_path)) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            tracing::error!("failed to open database {db_path}: {e}");
            std::process::exit(1);
        }
    };
    match storage.message_count() {
        Ok(count) if count > 0 => tracing::info!("{count} messages in history"),
        _ => {}
    }

    let state = RelayState::new(storage);
    let app = router(state);

    let addr = std::env::var("RELAY_ADDR").unwrap_or_else(|_| "0.0.0.0:3210".to_string());
    tracing::info!("chat-relay {} listening on {addr}", env!("BUILD_VERSION"));
    tracing::info!("WebSocket: ws://{addr}/ws");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
