//! WebSocket transport endpoint and per-connection pipeline.
//!
//! One read loop per connection keeps per-sender FIFO ordering; a paired
//! write task drains the connection's outbound queue into the socket.
//! When either side ends, the other is aborted and the disconnect monitor
//! runs exactly once for the connection.

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::message::{Envelope, MessageKind, classify};
use crate::monitor::DisconnectMonitor;
use crate::registry::{ConnectionId, IdentityRegistry};
use crate::relay::{BroadcastRelay, ConnectionTable};
use crate::storage::Storage;

/// Shared relay state: the registry, the live connection set, and the
/// components wired around them.
#[derive(Clone)]
pub struct RelayState {
    pub registry: IdentityRegistry,
    pub connections: ConnectionTable,
    pub relay: BroadcastRelay,
    pub monitor: DisconnectMonitor,
}

impl RelayState {
    pub fn new(storage: Arc<Storage>) -> Self {
        let registry = IdentityRegistry::new();
        let connections = ConnectionTable::new();
        let relay = BroadcastRelay::new(storage);
        let monitor = DisconnectMonitor::new(registry.clone(), connections.clone(), relay.clone());
        Self {
            registry,
            connections,
            relay,
            monitor,
        }
    }
}

/// Build the relay router.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Drive one client connection from accept to teardown.
pub async fn handle_connection(socket: WebSocket, state: RelayState) {
    let handle = ConnectionId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut outbound = state.connections.insert(handle).await;
    state.monitor.on_connect(handle).await;
    info!("connection {handle} accepted");

    // Write task: drain the outbound queue into the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(_) => continue,
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Read loop: classify each inbound envelope and route it.
    let pipeline = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = handle_envelope(&pipeline, handle, &text).await {
                        // A bad envelope costs itself, never the connection.
                        warn!("rejected envelope from {handle}: {e}");
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.monitor.on_disconnect(handle).await;
}

/// Classify one inbound frame and run it through the pipeline.
async fn handle_envelope(state: &RelayState, handle: ConnectionId, text: &str) -> Result<()> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let message = classify(envelope)?;

    // JOIN binds the identity before its broadcast is dispatched, so any
    // lookup issued right after sees the new name.
    if message.kind == MessageKind::Join {
        state.registry.register(handle, &message.sender).await?;
        info!("connection {handle} joined as {}", message.sender);
    }

    let snapshot = state.connections.snapshot().await;
    let report = state.relay.relay(&message, &snapshot);
    if !report.failed.is_empty() {
        debug!(
            "broadcast from {handle}: {} delivered, {} failed",
            report.delivered,
            report.failed.len()
        );
    }
    Ok(())
}
