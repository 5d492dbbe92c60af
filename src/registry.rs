//! The identity registry: who is connected as whom.
//!
//! The sole source of truth binding a connection handle to the display
//! name it claimed with its JOIN message. Pure in-memory state; entries
//! are removed one by one as connections close.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque handle for one live transport connection.
///
/// Minted when the transport accepts a connection; meaningless after it
/// closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authoritative mapping from connection handle to claimed display name.
///
/// Cheap to clone; all clones share the same map. Every operation is
/// atomic with respect to the others.
#[derive(Clone, Default)]
pub struct IdentityRegistry {
    bindings: Arc<RwLock<HashMap<ConnectionId, String>>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the binding for `handle`. Last write wins;
    /// names are not unique across connections. An empty name is
    /// rejected with [`Error::InvalidIdentity`].
    pub async fn register(&self, handle: ConnectionId, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidIdentity);
        }
        self.bindings.write().await.insert(handle, name.to_string());
        Ok(())
    }

    /// The current name for `handle`, reflecting the most recent
    /// `register` visible to this caller.
    pub async fn lookup(&self, handle: ConnectionId) -> Option<String> {
        self.bindings.read().await.get(&handle).cloned()
    }

    /// Atomically remove and return the binding for `handle`.
    ///
    /// Called once per connection lifecycle, at disconnect, so a late
    /// message can never re-read a stale name. A second call for the
    /// same handle returns `None`.
    pub async fn unregister(&self, handle: ConnectionId) -> Option<String> {
        self.bindings.write().await.remove(&handle)
    }
}
