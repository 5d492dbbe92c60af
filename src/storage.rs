//! SQLite persistence for chat history.
//!
//! History is an append-only byproduct of successful CHAT relays; nothing
//! in the relay path waits on it, and a write failure costs at most one
//! history entry.

use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;
use crate::message::ChatMessage;

/// Persistent storage backed by SQLite.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL mode for better concurrent read/write performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                kind      TEXT NOT NULL,
                sender    TEXT NOT NULL,
                content   TEXT NOT NULL,
                stored_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_stored_at
                ON messages(stored_at);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a message to history, returning its assigned id.
    pub fn store_message(&self, msg: &ChatMessage) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (kind, sender, content, stored_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![msg.kind.as_str(), msg.sender, msg.content, now_secs()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The most recent `limit` messages, oldest first. Rows whose kind no
    /// longer parses are skipped.
    pub fn recent_messages(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT kind, sender, content FROM messages
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (kind, sender, content) = row?;
            if let Ok(kind) = kind.parse() {
                messages.push(ChatMessage {
                    kind,
                    sender,
                    content,
                });
            }
        }
        messages.reverse();
        Ok(messages)
    }

    /// Number of stored messages.
    pub fn message_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn chat(sender: &str, content: &str) -> ChatMessage {
        ChatMessage {
            kind: MessageKind::Chat,
            sender: sender.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn store_assigns_increasing_ids() {
        let storage = Storage::open_in_memory().unwrap();
        let first = storage.store_message(&chat("alice", "one")).unwrap();
        let second = storage.store_message(&chat("alice", "two")).unwrap();
        assert!(second > first);
        assert_eq!(storage.message_count().unwrap(), 2);
    }

    #[test]
    fn recent_messages_returns_oldest_first() {
        let storage = Storage::open_in_memory().unwrap();
        for i in 0..5 {
            storage.store_message(&chat("alice", &format!("msg-{i}"))).unwrap();
        }

        let messages = storage.recent_messages(10).unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].content, "msg-0");
        assert_eq!(messages[4].content, "msg-4");
    }

    #[test]
    fn recent_messages_respects_limit() {
        let storage = Storage::open_in_memory().unwrap();
        for i in 0..5 {
            storage.store_message(&chat("bob", &format!("msg-{i}"))).unwrap();
        }

        let messages = storage.recent_messages(2).unwrap();
        assert_eq!(messages.len(), 2);
        // The two most recent, still oldest first.
        assert_eq!(messages[0].content, "msg-3");
        assert_eq!(messages[1].content, "msg-4");
    }
}
