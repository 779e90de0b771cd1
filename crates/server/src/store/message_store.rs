//! Conversation store: persisted messages and their mutable metadata.
//!
//! Rows are never hard-deleted; a delete sets the tombstone flag so replies
//! and read receipts stay referentially intact. The fanout layer reads
//! messages only through this store and never mutates them.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{ChatTarget, Message, ReadReceipt};

/// How long after creation the sender may still edit or delete a message.
pub const EDIT_WINDOW_SECS: i64 = 5 * 60;

/// Shared gate for edit and delete. Sender mismatch and an expired window
/// are reported distinctly.
pub fn check_mutable(message: &Message, actor: &str, now: DateTime<Utc>) -> Result<()> {
    if message.sender_id != actor {
        return Err(Error::Forbidden(
            "only the sender can modify a message".to_string(),
        ));
    }
    if now - message.created_at > Duration::seconds(EDIT_WINDOW_SECS) {
        return Err(Error::WindowExpired);
    }
    Ok(())
}

type MessageRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    bool,
    Option<String>,
    bool,
    Option<String>,
    String,
);

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, group_id, text, image, reply_to, \
                               edited, edited_at, deleted, deleted_at, created_at";

fn message_from_row(row: MessageRow) -> Result<Message> {
    let (
        id,
        sender_id,
        receiver_id,
        group_id,
        text,
        image,
        reply_to,
        edited,
        edited_at,
        deleted,
        deleted_at,
        created_at,
    ) = row;

    let target = match (receiver_id, group_id) {
        (Some(receiver_id), None) => ChatTarget::Direct { receiver_id },
        (None, Some(group_id)) => ChatTarget::Group { group_id },
        _ => {
            return Err(Error::Internal(format!(
                "message {id} has an invalid target"
            )))
        }
    };

    Ok(Message {
        id,
        sender_id,
        target,
        text,
        image,
        reply_to,
        edited,
        edited_at: edited_at.and_then(|t| t.parse().ok()),
        deleted,
        deleted_at: deleted_at.and_then(|t| t.parse().ok()),
        read_by: Vec::new(),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_db().await?;
        info!("[Messages] Initialized");
        Ok(store)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                receiver_id TEXT,
                group_id TEXT,
                text TEXT,
                image TEXT,
                reply_to TEXT,
                edited INTEGER NOT NULL DEFAULT 0,
                edited_at TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                deleted_at TEXT,
                created_at TEXT NOT NULL,
                CHECK ((receiver_id IS NULL) != (group_id IS NULL))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS read_receipts (
                message_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                read_at TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id),
                FOREIGN KEY (message_id) REFERENCES messages(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a freshly composed message.
    pub async fn save(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, sender_id, receiver_id, group_id, text, image, reply_to,
                                  edited, edited_at, deleted, deleted_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(message.target.as_direct())
        .bind(message.target.as_group())
        .bind(&message.text)
        .bind(&message.image)
        .bind(&message.reply_to)
        .bind(message.edited)
        .bind(message.edited_at.map(|t| t.to_rfc3339()))
        .bind(message.deleted)
        .bind(message.deleted_at.map(|t| t.to_rfc3339()))
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!("[Messages] Saved message {}", message.id);
        Ok(())
    }

    /// Fetch one message with its read receipts, tombstoned or not.
    pub async fn get(&self, message_id: &str) -> Result<Message> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        let mut message = message_from_row(row.ok_or(Error::NotFound("message"))?)?;
        self.attach_receipts(std::slice::from_mut(&mut message)).await?;
        Ok(message)
    }

    /// One page of a direct conversation, newest first. Callers re-reverse
    /// for chronological display.
    pub async fn direct_history(
        &self,
        me: &str,
        peer: &str,
        page: i64,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE deleted = 0 AND (
                (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)
            )
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(me)
        .bind(peer)
        .bind(peer)
        .bind(me)
        .bind(limit)
        .bind((page.max(1) - 1) * limit)
        .fetch_all(&self.pool)
        .await?;

        self.collect_with_receipts(rows).await
    }

    /// One page of a group conversation, newest first.
    pub async fn group_history(
        &self,
        group_id: &str,
        page: i64,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE deleted = 0 AND group_id = ?
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(group_id)
        .bind(limit)
        .bind((page.max(1) - 1) * limit)
        .fetch_all(&self.pool)
        .await?;

        self.collect_with_receipts(rows).await
    }

    /// Replace the text of a message, gated on sender and window. Returns
    /// the updated record.
    pub async fn edit(&self, message_id: &str, actor: &str, text: &str) -> Result<Message> {
        let message = self.get(message_id).await?;
        check_mutable(&message, actor, Utc::now())?;

        if text.trim().is_empty() {
            return Err(Error::Validation("message text is required".to_string()));
        }

        sqlx::query("UPDATE messages SET text = ?, edited = 1, edited_at = ? WHERE id = ?")
            .bind(text)
            .bind(Utc::now().to_rfc3339())
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        info!("[Messages] Edited message {}", message_id);
        self.get(message_id).await
    }

    /// Tombstone a message, gated on sender and window. The row persists.
    pub async fn delete(&self, message_id: &str, actor: &str) -> Result<Message> {
        let message = self.get(message_id).await?;
        check_mutable(&message, actor, Utc::now())?;

        sqlx::query("UPDATE messages SET deleted = 1, deleted_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        info!("[Messages] Deleted message {}", message_id);
        self.get(message_id).await
    }

    /// Append a read receipt. Idempotent: a reader is recorded at most once
    /// and receipts are never removed.
    pub async fn mark_read(&self, message_id: &str, reader_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at) VALUES (?, ?, ?)",
        )
        .bind(message_id)
        .bind(reader_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Case-insensitive text search within one conversation, newest first.
    pub async fn search(&self, scope: &ChatTarget, me: &str, query: &str) -> Result<Vec<Message>> {
        let pattern = format!("%{}%", query);
        let rows: Vec<MessageRow> = match scope {
            ChatTarget::Direct { receiver_id } => {
                sqlx::query_as(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE deleted = 0 AND text LIKE ? COLLATE NOCASE AND (
                        (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?)
                    )
                    ORDER BY created_at DESC
                    "#
                ))
                .bind(&pattern)
                .bind(me)
                .bind(receiver_id)
                .bind(receiver_id)
                .bind(me)
                .fetch_all(&self.pool)
                .await?
            }
            ChatTarget::Group { group_id } => {
                sqlx::query_as(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE deleted = 0 AND text LIKE ? COLLATE NOCASE AND group_id = ?
                    ORDER BY created_at DESC
                    "#
                ))
                .bind(&pattern)
                .bind(group_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        self.collect_with_receipts(rows).await
    }

    async fn collect_with_receipts(&self, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
        let mut messages = rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        self.attach_receipts(&mut messages).await?;
        Ok(messages)
    }

    /// Load receipts for a batch of messages with one query.
    async fn attach_receipts(&self, messages: &mut [Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; messages.len()].join(", ");
        let sql = format!(
            "SELECT message_id, user_id, read_at FROM read_receipts \
             WHERE message_id IN ({placeholders}) ORDER BY read_at"
        );
        let mut query = sqlx::query_as::<_, (String, String, String)>(&sql);
        for message in messages.iter() {
            query = query.bind(message.id.clone());
        }

        let mut by_message: HashMap<String, Vec<ReadReceipt>> = HashMap::new();
        for (message_id, user_id, read_at) in query.fetch_all(&self.pool).await? {
            by_message.entry(message_id).or_default().push(ReadReceipt {
                user_id,
                read_at: read_at.parse().unwrap_or_else(|_| Utc::now()),
            });
        }

        for message in messages.iter_mut() {
            if let Some(receipts) = by_message.remove(&message.id) {
                message.read_by = receipts;
            }
        }
        Ok(())
    }
}
