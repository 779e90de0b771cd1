//! Domain types shared across the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Where a message is addressed. Exactly one side exists by construction;
/// the old both-or-neither failure mode is unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatTarget {
    Direct {
        #[serde(rename = "receiverId")]
        receiver_id: String,
    },
    Group {
        #[serde(rename = "groupId")]
        group_id: String,
    },
}

impl ChatTarget {
    pub fn direct(receiver_id: impl Into<String>) -> Self {
        ChatTarget::Direct {
            receiver_id: receiver_id.into(),
        }
    }

    pub fn group(group_id: impl Into<String>) -> Self {
        ChatTarget::Group {
            group_id: group_id.into(),
        }
    }

    pub fn as_direct(&self) -> Option<&str> {
        match self {
            ChatTarget::Direct { receiver_id } => Some(receiver_id),
            ChatTarget::Group { .. } => None,
        }
    }

    pub fn as_group(&self) -> Option<&str> {
        match self {
            ChatTarget::Group { group_id } => Some(group_id),
            ChatTarget::Direct { .. } => None,
        }
    }
}

/// A read receipt: one per reader, append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    #[serde(flatten)]
    pub target: ChatTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    /// Tombstone: deleted messages keep their row.
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a new message, rejecting an empty payload before it can reach
    /// the store.
    pub fn compose(
        sender_id: impl Into<String>,
        target: ChatTarget,
        text: Option<String>,
        image: Option<String>,
        reply_to: Option<String>,
    ) -> Result<Self> {
        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && image.is_none() {
            return Err(Error::Validation(
                "message needs text or an image".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            target,
            text,
            image,
            reply_to,
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            read_by: Vec::new(),
            created_at: Utc::now(),
        })
    }
}

/// A group chat: member set plus admin subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub members: Vec<String>,
    pub admins: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Which kind of conversation a request is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    #[default]
    User,
    Group,
}

/// Input for sending a message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageInput {
    pub text: Option<String>,
    /// Base64-encoded image payload (optionally a data URI).
    pub image: Option<String>,
    pub reply_to: Option<String>,
    #[serde(rename = "type", default)]
    pub chat_type: ChatType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_requires_text_or_image() {
        let err = Message::compose("alice", ChatTarget::direct("bob"), None, None, None);
        assert!(matches!(err, Err(Error::Validation(_))));

        let blank = Message::compose(
            "alice",
            ChatTarget::direct("bob"),
            Some("   ".to_string()),
            None,
            None,
        );
        assert!(matches!(blank, Err(Error::Validation(_))));

        let text_only = Message::compose(
            "alice",
            ChatTarget::direct("bob"),
            Some("hi".to_string()),
            None,
            None,
        )
        .unwrap();
        assert_eq!(text_only.text.as_deref(), Some("hi"));

        let image_only = Message::compose(
            "alice",
            ChatTarget::group("g1"),
            None,
            Some("/images/abc".to_string()),
            None,
        )
        .unwrap();
        assert!(image_only.text.is_none());
    }

    #[test]
    fn message_serializes_target_as_flat_field() {
        let msg = Message::compose(
            "alice",
            ChatTarget::direct("bob"),
            Some("hi".to_string()),
            None,
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["receiverId"], "bob");
        assert!(json.get("groupId").is_none());

        let msg = Message::compose(
            "alice",
            ChatTarget::group("g1"),
            Some("hi".to_string()),
            None,
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["groupId"], "g1");
        assert!(json.get("receiverId").is_none());
    }
}
