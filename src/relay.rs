//! Broadcast fan-out: deliver a classified message to every live
//! connection and append CHAT messages to history.
//!
//! Each connection owns a bounded outbound queue; a broadcast is a
//! non-blocking `try_send` to every queue in a snapshot of the connection
//! set. A slow or dead recipient costs itself that one message, never the
//! rest of the broadcast.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{error, warn};

use crate::message::{ChatMessage, MessageKind};
use crate::registry::ConnectionId;
use crate::storage::Storage;

/// Capacity of each connection's outbound queue. A consumer that falls
/// this far behind starts losing messages rather than stalling broadcasts.
pub const OUTBOUND_QUEUE: usize = 64;

/// Sender half of one connection's outbound queue.
pub type OutboundSender = mpsc::Sender<ChatMessage>;

/// The set of live connections, keyed by handle.
///
/// Broadcasts operate on a snapshot taken at call time: a connection that
/// joins mid-broadcast is not guaranteed that message, and one that drops
/// mid-broadcast is skipped.
#[derive(Clone, Default)]
pub struct ConnectionTable {
    inner: Arc<RwLock<HashMap<ConnectionId, OutboundSender>>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection, returning the receiving end of its outbound
    /// queue. The transport's write task drains it into the socket.
    pub async fn insert(&self, handle: ConnectionId) -> mpsc::Receiver<ChatMessage> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        self.inner.write().await.insert(handle, tx);
        rx
    }

    /// Drop a connection and its queue resources.
    pub async fn remove(&self, handle: ConnectionId) {
        self.inner.write().await.remove(&handle);
    }

    /// The fan-out snapshot: every live connection at this instant.
    pub async fn snapshot(&self) -> Vec<(ConnectionId, OutboundSender)> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(h, tx)| (*h, tx.clone()))
            .collect()
    }
}

/// Why one recipient missed a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The recipient's outbound queue was full (slow consumer).
    QueueFull,
    /// The recipient was already closing when delivery was attempted.
    Closed,
}

/// Outcome of one broadcast.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<(ConnectionId, DeliveryFailure)>,
}

/// Fans classified messages out to live connections.
///
/// The relay never mutates the identity registry: JOIN registration
/// happens in the pipeline before the broadcast, LEAVE eviction in the
/// disconnect monitor before the LEAVE message exists.
#[derive(Clone)]
pub struct BroadcastRelay {
    storage: Arc<Storage>,
}

impl BroadcastRelay {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Deliver `message` to every connection in `snapshot`, then hand
    /// CHAT messages to storage.
    ///
    /// Per-recipient failures are collected in the report, never raised.
    /// The sender's own handle is part of the snapshot, so it sees its
    /// message echoed back.
    pub fn relay(
        &self,
        message: &ChatMessage,
        snapshot: &[(ConnectionId, OutboundSender)],
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for (handle, tx) in snapshot {
            match tx.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("outbound queue full, dropping message for {handle}");
                    report.failed.push((*handle, DeliveryFailure::QueueFull));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Disconnected mid-broadcast; the monitor will reap it.
                    report.failed.push((*handle, DeliveryFailure::Closed));
                }
            }
        }

        if message.kind == MessageKind::Chat {
            self.persist(message.clone());
        }

        report
    }

    /// Append a CHAT message to history, fire-and-forget. History
    /// durability never blocks or fails a broadcast.
    fn persist(&self, message: ChatMessage) {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = storage.store_message(&message) {
                error!("failed to persist message: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn chat(sender: &str, content: &str) -> ChatMessage {
        ChatMessage {
            kind: MessageKind::Chat,
            sender: sender.to_string(),
            content: content.to_string(),
        }
    }

    fn join(sender: &str) -> ChatMessage {
        ChatMessage {
            kind: MessageKind::Join,
            sender: sender.to_string(),
            content: String::new(),
        }
    }

    fn relay_with_storage() -> (BroadcastRelay, Arc<Storage>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        (BroadcastRelay::new(Arc::clone(&storage)), storage)
    }

    async fn persisted_count(storage: &Storage) -> i64 {
        // Persistence is a spawned task; poll briefly for it to land.
        for _ in 0..100 {
            let count = storage.message_count().unwrap();
            if count > 0 {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        storage.message_count().unwrap()
    }

    #[tokio::test]
    async fn fan_out_reaches_every_connection_including_sender() {
        let (relay, storage) = relay_with_storage();
        let table = ConnectionTable::new();

        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();
        let mut rx_a = table.insert(a).await;
        let mut rx_b = table.insert(b).await;
        let mut rx_c = table.insert(c).await;

        let snapshot = table.snapshot().await;
        let report = relay.relay(&chat("alice", "hi"), &snapshot);

        assert_eq!(report.delivered, 3);
        assert!(report.failed.is_empty());
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.content, "hi");
            assert_eq!(msg.sender, "alice");
        }

        // Exactly one persistence call for the chat.
        assert_eq!(persisted_count(&storage).await, 1);
    }

    #[tokio::test]
    async fn one_dead_recipient_does_not_abort_the_broadcast() {
        let (relay, _storage) = relay_with_storage();
        let table = ConnectionTable::new();

        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();
        let mut rx_a = table.insert(a).await;
        let rx_b = table.insert(b).await;
        let mut rx_c = table.insert(c).await;
        drop(rx_b); // b is gone but still in the snapshot

        let snapshot = table.snapshot().await;
        let report = relay.relay(&chat("alice", "still here"), &snapshot);

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec![(b, DeliveryFailure::Closed)]);
        assert_eq!(rx_a.recv().await.unwrap().content, "still here");
        assert_eq!(rx_c.recv().await.unwrap().content, "still here");
    }

    #[tokio::test]
    async fn slow_consumer_drops_message_instead_of_stalling() {
        let (relay, _storage) = relay_with_storage();
        let table = ConnectionTable::new();

        let a = ConnectionId::new();
        let _rx_a = table.insert(a).await; // never drained
        let snapshot = table.snapshot().await;

        for _ in 0..OUTBOUND_QUEUE {
            let report = relay.relay(&join("alice"), &snapshot);
            assert_eq!(report.delivered, 1);
        }

        let report = relay.relay(&join("alice"), &snapshot);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, vec![(a, DeliveryFailure::QueueFull)]);
    }

    #[tokio::test]
    async fn only_chat_messages_are_persisted() {
        let (relay, storage) = relay_with_storage();
        let table = ConnectionTable::new();
        let _rx = table.insert(ConnectionId::new()).await;
        let snapshot = table.snapshot().await;

        relay.relay(&join("alice"), &snapshot);
        relay.relay(&ChatMessage::leave("alice".to_string()), &snapshot);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(storage.message_count().unwrap(), 0);

        relay.relay(&chat("alice", "recorded"), &snapshot);
        assert_eq!(persisted_count(&storage).await, 1);
    }

    #[tokio::test]
    async fn snapshot_excludes_removed_connections() {
        let table = ConnectionTable::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let _rx_a = table.insert(a).await;
        let _rx_b = table.insert(b).await;

        table.remove(a).await;
        let snapshot = table.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, b);
    }
}
