//! # Message Store
//!
//! Chat and message history for one session, kept in `messages.db` (SQLite).
//!
//! ## Connection Model:
//! Every method opens its own connection with WAL and a busy timeout, so the store
//! is `Clone + Send + Sync` and needs no lock of its own. Timestamps are stored
//! as unix seconds.

use crate::client::media::MediaKind;
use crate::error::BridgeError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const MESSAGE_DB_FILE: &str = "messages.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chats (
    jid TEXT PRIMARY KEY,
    name TEXT,
    last_message_time INTEGER
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT,
    chat_jid TEXT REFERENCES chats(jid),
    sender TEXT,
    content TEXT,
    timestamp INTEGER,
    is_from_me BOOLEAN,
    media_type TEXT,
    filename TEXT,
    url TEXT,
    media_key BLOB,
    file_length INTEGER,
    PRIMARY KEY (id, chat_jid)
);
CREATE INDEX IF NOT EXISTS idx_messages_chat_time ON messages(chat_jid, timestamp DESC);
"#;

/// Attachment metadata needed to fetch the file later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub kind: MediaKind,
    pub filename: String,
    pub url: String,
    pub media_key: Vec<u8>,
    pub file_length: u64,
}

impl StoredMedia {
    /// Enough information to ask the service for the file.
    pub fn is_downloadable(&self) -> bool {
        !self.url.is_empty() && !self.media_key.is_empty() && self.file_length > 0
    }
}

/// A message about to be written.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub chat_jid: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub media: Option<StoredMedia>,
}

/// A message as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub chat_jid: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub media_type: Option<MediaKind>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    pub jid: String,
    pub name: String,
    pub last_message_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    path: PathBuf,
}

impl MessageStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.conn()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection, BridgeError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| BridgeError::storage(&format!("open {}", self.path.display()), e))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        Ok(conn)
    }

    /// Insert or update a chat. An empty `name` keeps whatever name is stored.
    pub fn store_chat(
        &self,
        jid: &str,
        name: &str,
        last_message_time: DateTime<Utc>,
    ) -> Result<(), BridgeError> {
        self.conn()?.execute(
            "INSERT INTO chats (jid, name, last_message_time) VALUES (?1, ?2, ?3)
             ON CONFLICT(jid) DO UPDATE SET
                name = CASE WHEN excluded.name <> '' THEN excluded.name ELSE chats.name END,
                last_message_time = MAX(COALESCE(chats.last_message_time, 0), excluded.last_message_time)",
            params![jid, name, last_message_time.timestamp()],
        )?;
        Ok(())
    }

    /// Stored name for a chat, `None` when unknown or empty.
    pub fn chat_name(&self, jid: &str) -> Result<Option<String>, BridgeError> {
        let name: Option<Option<String>> = self
            .conn()?
            .query_row("SELECT name FROM chats WHERE jid = ?1", [jid], |row| row.get(0))
            .optional()?;
        Ok(name.flatten().filter(|n| !n.is_empty()))
    }

    /// Write a message. Returns `false` without touching the database when the
    /// message has neither text nor media.
    pub fn store_message(&self, message: &StoredMessage) -> Result<bool, BridgeError> {
        if message.content.is_empty() && message.media.is_none() {
            return Ok(false);
        }

        let media = message.media.as_ref();
        self.conn()?.execute(
            "INSERT OR REPLACE INTO messages
                (id, chat_jid, sender, content, timestamp, is_from_me,
                 media_type, filename, url, media_key, file_length)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id,
                message.chat_jid,
                message.sender,
                message.content,
                message.timestamp.timestamp(),
                message.is_from_me,
                media.map(|m| m.kind.as_str()),
                media.map(|m| m.filename.as_str()),
                media.map(|m| m.url.as_str()),
                media.map(|m| m.media_key.as_slice()),
                media.map(|m| m.file_length as i64),
            ],
        )?;
        Ok(true)
    }

    /// Most recent messages of a chat, newest first.
    pub fn messages(&self, chat_jid: &str, limit: usize) -> Result<Vec<MessageRecord>, BridgeError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, chat_jid, sender, content, timestamp, is_from_me, media_type, filename
             FROM messages WHERE chat_jid = ?1
             ORDER BY timestamp DESC LIMIT ?2",
        )?;

        // a negative LIMIT means no limit to SQLite
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![chat_jid, limit], |row| {
            let media_type: Option<String> = row.get(6)?;
            Ok(MessageRecord {
                id: row.get(0)?,
                chat_jid: row.get(1)?,
                sender: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                content: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                timestamp: from_unix(row.get(4)?),
                is_from_me: row.get(5)?,
                media_type: media_type.and_then(|t| t.parse().ok()),
                filename: row.get(7)?,
            })
        })?;

        let messages = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// All chats, most recently active first.
    pub fn chats(&self) -> Result<Vec<ChatSummary>, BridgeError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT jid, name, last_message_time FROM chats ORDER BY last_message_time DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let last: Option<i64> = row.get(2)?;
            Ok(ChatSummary {
                jid: row.get(0)?,
                name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                last_message_time: last.map(from_unix),
            })
        })?;

        let chats = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(chats)
    }

    /// Attachment metadata of one message.
    ///
    /// ## Returns:
    /// - `Ok(Some(_))` for a media message
    /// - `Ok(None)` for a text-only message
    /// - `Err(NotFound)` when no such message exists
    pub fn media_info(&self, id: &str, chat_jid: &str) -> Result<Option<StoredMedia>, BridgeError> {
        type MediaRow = (
            Option<String>,
            Option<String>,
            Option<String>,
            Option<Vec<u8>>,
            Option<i64>,
        );

        let row: Option<MediaRow> = self
            .conn()?
            .query_row(
                "SELECT media_type, filename, url, media_key, file_length
                 FROM messages WHERE id = ?1 AND chat_jid = ?2",
                params![id, chat_jid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let (media_type, filename, url, media_key, file_length) = row.ok_or_else(|| {
            BridgeError::NotFound(format!("message {} in chat {}", id, chat_jid))
        })?;

        let kind = match media_type.as_deref() {
            None | Some("") => return Ok(None),
            Some(kind) => kind.parse::<MediaKind>()?,
        };

        Ok(Some(StoredMedia {
            kind,
            filename: filename.unwrap_or_default(),
            url: url.unwrap_or_default(),
            media_key: media_key.unwrap_or_default(),
            file_length: file_length.unwrap_or(0).max(0) as u64,
        }))
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
