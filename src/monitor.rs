//! Disconnect handling: transport-level connection drops become LEAVE
//! announcements.
//!
//! Per connection the monitor walks `Connected → Departing → Terminated`,
//! with `Terminated` absorbing: a disconnect is handled at most once, and
//! a second invocation for the same handle is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::message::ChatMessage;
use crate::registry::{ConnectionId, IdentityRegistry};
use crate::relay::{BroadcastRelay, ConnectionTable};

/// Lifecycle of one connection as the monitor sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Connected,
    Departing,
    Terminated,
}

/// Bridges transport disconnect events into the chat protocol's LEAVE
/// semantics.
#[derive(Clone)]
pub struct DisconnectMonitor {
    registry: IdentityRegistry,
    connections: ConnectionTable,
    relay: BroadcastRelay,
    states: Arc<RwLock<HashMap<ConnectionId, Lifecycle>>>,
}

impl DisconnectMonitor {
    pub fn new(
        registry: IdentityRegistry,
        connections: ConnectionTable,
        relay: BroadcastRelay,
    ) -> Self {
        Self {
            registry,
            connections,
            relay,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a freshly accepted connection. Informational only; no
    /// registry action happens until its JOIN arrives.
    pub async fn on_connect(&self, handle: ConnectionId) {
        self.states.write().await.insert(handle, Lifecycle::Connected);
    }

    /// The monitor's view of `handle`. Handles it has never seen, or has
    /// already reaped, read as [`Lifecycle::Terminated`].
    pub async fn state(&self, handle: ConnectionId) -> Lifecycle {
        self.states
            .read()
            .await
            .get(&handle)
            .copied()
            .unwrap_or(Lifecycle::Terminated)
    }

    /// Handle a transport disconnect for `handle`.
    ///
    /// Evicts the connection and its identity binding, then announces the
    /// departure to the remaining connections if the handle ever
    /// registered. If it never did, nothing is emitted; that is not an
    /// error.
    pub async fn on_disconnect(&self, handle: ConnectionId) {
        {
            let mut states = self.states.write().await;
            match states.get(&handle) {
                Some(Lifecycle::Connected) => {
                    states.insert(handle, Lifecycle::Departing);
                }
                // Already departing, already terminated, or never seen.
                _ => return,
            }
        }

        // Release the queue before eviction so the fan-out snapshot below
        // cannot include the departing handle.
        self.connections.remove(handle).await;

        match self.registry.unregister(handle).await {
            Some(name) => {
                info!("connection {handle} ({name}) disconnected");
                let snapshot: Vec<_> = self
                    .connections
                    .snapshot()
                    .await
                    .into_iter()
                    .filter(|(h, _)| *h != handle)
                    .collect();
                self.relay.relay(&ChatMessage::leave(name), &snapshot);
            }
            None => {
                info!("connection {handle} disconnected before joining");
            }
        }

        // Terminated: the entry is dropped so no state outlives the
        // connection; absent entries read as Terminated.
        self.states.write().await.remove(&handle);
    }
}
