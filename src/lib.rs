//! # chat-relay
//!
//! A WebSocket group chat relay. Clients connect, announce a display name
//! with a JOIN message, exchange CHAT messages that are fanned out to every
//! live connection (the sender included), and are announced with a LEAVE
//! when their connection drops.
//!
//! The core is three pieces:
//! - the identity registry (connection handle → display name),
//! - the broadcast relay (snapshot fan-out with per-recipient failure
//!   isolation),
//! - the disconnect monitor (transport drops become LEAVE announcements,
//!   at most once per connection).
//!
//! The WebSocket endpoint lives in [`server`]; message history is appended
//! to SQLite by [`storage`] as a byproduct of successful CHAT relays.

pub mod error;
pub mod message;
pub mod monitor;
pub mod registry;
pub mod relay;
pub mod server;
pub mod storage;
