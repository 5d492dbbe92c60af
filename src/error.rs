//! Error types for chat-relay.

use thiserror::Error;

/// Errors that can occur while classifying or routing chat messages.
///
/// None of these are fatal: a classification failure rejects the single
/// envelope that caused it, and a storage failure costs at most one
/// history entry. Per-recipient delivery failures are not errors at all;
/// they are reported in the relay's delivery report.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("missing sender")]
    MissingSender,

    #[error("empty chat content")]
    EmptyContent,

    #[error("invalid identity: display name must be non-empty")]
    InvalidIdentity,

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Result type alias for chat-relay operations.
pub type Result<T> = std::result::Result<T, Error>;
