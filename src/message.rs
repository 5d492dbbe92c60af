//! Wire message types and the inbound classifier.
//!
//! Every frame a client sends is a JSON envelope with a `kind` tag. The
//! classifier turns an envelope into a validated [`ChatMessage`] or rejects
//! it; nothing malformed reaches the relay.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// The closed set of chat event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Join,
    Chat,
    Leave,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Join => "JOIN",
            MessageKind::Chat => "CHAT",
            MessageKind::Leave => "LEAVE",
        }
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "JOIN" => Ok(MessageKind::Join),
            "CHAT" => Ok(MessageKind::Chat),
            "LEAVE" => Ok(MessageKind::Leave),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// A raw inbound envelope, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub kind: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: String,
}

/// A validated chat message. Immutable once classified; flows by value
/// through the pipeline. Gets an id only when persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub kind: MessageKind,
    pub sender: String,
    pub content: String,
}

impl ChatMessage {
    /// The LEAVE notice broadcast when a named connection drops.
    pub fn leave(sender: String) -> Self {
        Self {
            kind: MessageKind::Leave,
            sender,
            content: String::new(),
        }
    }
}

/// Validate a raw envelope into a [`ChatMessage`].
///
/// Rejects unknown kinds, an absent or empty `sender`, and CHAT with an
/// absent or empty `content` (empty chat messages are never relayed).
/// `content` on JOIN and LEAVE is ignored and normalized to empty.
pub fn classify(envelope: Envelope) -> Result<ChatMessage> {
    let kind: MessageKind = envelope.kind.parse()?;

    if envelope.sender.is_empty() {
        return Err(Error::MissingSender);
    }

    let content = match kind {
        MessageKind::Chat if envelope.content.is_empty() => return Err(Error::EmptyContent),
        MessageKind::Chat => envelope.content,
        _ => String::new(),
    };

    Ok(ChatMessage {
        kind,
        sender: envelope.sender,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(kind: &str, sender: &str, content: &str) -> Envelope {
        Envelope {
            kind: kind.to_string(),
            sender: sender.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn classify_valid_chat() {
        let msg = classify(envelope("CHAT", "alice", "hello")).unwrap();
        assert_eq!(msg.kind, MessageKind::Chat);
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = classify(envelope("SHOUT", "alice", "hello")).unwrap_err();
        assert!(matches!(err, Error::UnknownKind(k) if k == "SHOUT"));
    }

    #[test]
    fn missing_sender_is_rejected_for_every_kind() {
        for kind in ["JOIN", "CHAT", "LEAVE"] {
            let err = classify(envelope(kind, "", "hello")).unwrap_err();
            assert!(matches!(err, Error::MissingSender));
        }
    }

    #[test]
    fn empty_chat_content_is_rejected() {
        let err = classify(envelope("CHAT", "alice", "")).unwrap_err();
        assert!(matches!(err, Error::EmptyContent));
    }

    #[test]
    fn join_and_leave_content_is_normalized_to_empty() {
        let join = classify(envelope("JOIN", "alice", "connection init")).unwrap();
        assert_eq!(join.content, "");
        let leave = classify(envelope("LEAVE", "alice", "bye")).unwrap();
        assert_eq!(leave.content, "");
    }

    #[test]
    fn kind_serializes_uppercase() {
        let msg = ChatMessage::leave("carol".to_string());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""kind":"LEAVE""#), "{json}");
    }

    #[test]
    fn envelope_tolerates_absent_fields() {
        let env: Envelope = serde_json::from_str(r#"{"kind":"CHAT"}"#).unwrap();
        let err = classify(env).unwrap_err();
        assert!(matches!(err, Error::MissingSender));
    }
}
