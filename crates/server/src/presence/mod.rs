//! In-memory presence table: who is online and how to reach them.
//!
//! The table is the sole source of truth for "online". It is mutated only by
//! the session gateway; the fanout router just reads it. Nothing here is
//! persisted.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::fanout::ServerEvent;

/// Outbound half of one live websocket connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue an event without blocking. A full or closed queue means the
    /// socket is stalled or going away; the event is dropped.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

/// Maps each online user to their single active connection. A user has at
/// most one; a newer connection supersedes the old mapping.
#[derive(Default)]
pub struct PresenceTable {
    online: RwLock<HashMap<String, ConnectionHandle>>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any existing mapping for the user. Broadcasting the change
    /// is the caller's responsibility.
    pub async fn register(&self, user_id: &str, handle: ConnectionHandle) {
        self.online.write().await.insert(user_id.to_string(), handle);
    }

    /// Removes the mapping only while `connection_id` still matches, so a
    /// stale disconnect cannot evict the connection that superseded it.
    pub async fn unregister(&self, user_id: &str, connection_id: &str) {
        let mut online = self.online.write().await;
        if online
            .get(user_id)
            .is_some_and(|handle| handle.id == connection_id)
        {
            online.remove(user_id);
        }
    }

    pub async fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.online.read().await.get(user_id).cloned()
    }

    /// Ids of everyone currently online, in no particular order.
    pub async fn snapshot(&self) -> Vec<String> {
        self.online.read().await.keys().cloned().collect()
    }
}
