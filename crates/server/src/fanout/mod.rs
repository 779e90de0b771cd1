//! Fanout router: delivers a conversation event to exactly the connections
//! that should see it, and to no others.
//!
//! Delivery is best-effort. A recipient missing from the presence table is
//! skipped silently; there is no queue and no retry.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::groups::GroupManager;
use crate::models::{ChatTarget, Message};
use crate::presence::PresenceTable;

/// Server→client event vocabulary. The serialized variant names are the wire
/// contract.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Full online set, pushed on every register/unregister.
    GetOnlineUsers(Vec<String>),
    NewMessage(Message),
    MessageEdited(Message),
    /// Carries only the message id; the row itself is a tombstone.
    MessageDeleted(String),
    Typing {
        from: String,
        is_typing: bool,
    },
    FriendRequest {
        from: String,
        #[serde(rename = "type")]
        kind: FriendEventKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendEventKind {
    Received,
    Accepted,
}

pub struct FanoutRouter {
    presence: Arc<PresenceTable>,
    groups: Arc<GroupManager>,
}

impl FanoutRouter {
    pub fn new(presence: Arc<PresenceTable>, groups: Arc<GroupManager>) -> Self {
        Self { presence, groups }
    }

    /// Deliver to a single user if they are online.
    pub async fn deliver_to_user(&self, user_id: &str, event: ServerEvent) {
        match self.presence.lookup(user_id).await {
            Some(handle) => {
                if !handle.send(event) {
                    debug!("dropped event for closing connection of {}", user_id);
                }
            }
            None => debug!("recipient {} offline, event skipped", user_id),
        }
    }

    /// Deliver to every current group member except the actor. Offline
    /// members are skipped individually; partial delivery is expected.
    pub async fn deliver_to_group(
        &self,
        group_id: &str,
        actor_id: &str,
        event: ServerEvent,
    ) -> Result<()> {
        let members = self.groups.members(group_id).await?;
        for member in members.iter().filter(|m| m.as_str() != actor_id) {
            self.deliver_to_user(member, event.clone()).await;
        }
        Ok(())
    }

    /// Route a message-scoped event to its conversation audience: the peer
    /// for a direct message, the roster minus the sender for a group one.
    pub async fn deliver_for_message(&self, message: &Message, event: ServerEvent) -> Result<()> {
        match &message.target {
            ChatTarget::Direct { receiver_id } => {
                self.deliver_to_user(receiver_id, event).await;
                Ok(())
            }
            ChatTarget::Group { group_id } => {
                self.deliver_to_group(group_id, &message.sender_id, event)
                    .await
            }
        }
    }

    /// Push the full online set to every registered connection. Full state,
    /// not a diff, so a dropped broadcast cannot cause lasting drift.
    pub async fn broadcast_online(&self) {
        let online = self.presence.snapshot().await;
        let event = ServerEvent::GetOnlineUsers(online.clone());
        for user_id in &online {
            self.deliver_to_user(user_id, event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ConnectionHandle;
    use crate::store;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    async fn router_with_groups() -> (TempDir, Arc<PresenceTable>, Arc<GroupManager>, FanoutRouter)
    {
        let dir = TempDir::new().unwrap();
        let pool = store::connect(&dir.path().join("test.sqlite")).await.unwrap();
        let groups = Arc::new(GroupManager::new(pool).await.unwrap());
        let presence = Arc::new(PresenceTable::new());
        let router = FanoutRouter::new(presence.clone(), groups.clone());
        (dir, presence, groups, router)
    }

    async fn register(presence: &PresenceTable, user: &str) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(16);
        presence.register(user, ConnectionHandle::new(tx)).await;
        rx
    }

    fn text_to(sender: &str, target: ChatTarget) -> Message {
        Message::compose(sender, target, Some("hi".to_string()), None, None).unwrap()
    }

    #[tokio::test]
    async fn direct_message_reaches_only_the_receiver() {
        let (_dir, presence, _groups, router) = router_with_groups().await;
        let mut alice_rx = register(&presence, "alice").await;
        let mut bob_rx = register(&presence, "bob").await;

        let msg = text_to("alice", ChatTarget::direct("bob"));
        router
            .deliver_for_message(&msg, ServerEvent::NewMessage(msg.clone()))
            .await
            .unwrap();

        match bob_rx.try_recv().unwrap() {
            ServerEvent::NewMessage(received) => {
                assert_eq!(received.sender_id, "alice");
                assert_eq!(received.text.as_deref(), Some("hi"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(bob_rx.try_recv().is_err(), "exactly one event expected");
        assert!(alice_rx.try_recv().is_err(), "sender gets no echo");
    }

    #[tokio::test]
    async fn offline_receiver_is_skipped_silently() {
        let (_dir, presence, _groups, router) = router_with_groups().await;
        let mut alice_rx = register(&presence, "alice").await;

        let msg = text_to("alice", ChatTarget::direct("bob"));
        router
            .deliver_for_message(&msg, ServerEvent::NewMessage(msg.clone()))
            .await
            .unwrap();

        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn group_fanout_skips_actor_and_offline_members() {
        let (_dir, presence, groups, router) = router_with_groups().await;
        let group = groups
            .create_group(
                "team".to_string(),
                None,
                vec![
                    "alice".to_string(),
                    "bob".to_string(),
                    "carol".to_string(),
                    "dave".to_string(),
                ],
                "alice",
            )
            .await
            .unwrap();

        let mut alice_rx = register(&presence, "alice").await;
        let mut bob_rx = register(&presence, "bob").await;
        let mut carol_rx = register(&presence, "carol").await;
        // dave stays offline; eve is online but not a member
        let mut eve_rx = register(&presence, "eve").await;

        let msg = text_to("alice", ChatTarget::group(&group.id));
        router
            .deliver_for_message(&msg, ServerEvent::NewMessage(msg.clone()))
            .await
            .unwrap();

        assert!(matches!(
            bob_rx.try_recv().unwrap(),
            ServerEvent::NewMessage(_)
        ));
        assert!(matches!(
            carol_rx.try_recv().unwrap(),
            ServerEvent::NewMessage(_)
        ));
        assert!(alice_rx.try_recv().is_err(), "actor excluded");
        assert!(eve_rx.try_recv().is_err(), "non-member excluded");
    }

    #[tokio::test]
    async fn broadcast_online_reaches_every_connection() {
        let (_dir, presence, _groups, router) = router_with_groups().await;
        let mut alice_rx = register(&presence, "alice").await;
        let mut bob_rx = register(&presence, "bob").await;

        router.broadcast_online().await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            match rx.try_recv().unwrap() {
                ServerEvent::GetOnlineUsers(online) => {
                    let mut online = online;
                    online.sort();
                    assert_eq!(online, vec!["alice", "bob"]);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn event_names_are_the_wire_contract() {
        let cases = [
            (
                serde_json::to_value(ServerEvent::GetOnlineUsers(vec![])).unwrap(),
                "getOnlineUsers",
            ),
            (
                serde_json::to_value(ServerEvent::MessageDeleted("m1".to_string())).unwrap(),
                "messageDeleted",
            ),
            (
                serde_json::to_value(ServerEvent::Typing {
                    from: "alice".to_string(),
                    is_typing: true,
                })
                .unwrap(),
                "typing",
            ),
            (
                serde_json::to_value(ServerEvent::FriendRequest {
                    from: "alice".to_string(),
                    kind: FriendEventKind::Received,
                })
                .unwrap(),
                "friendRequest",
            ),
        ];
        for (json, expected) in cases {
            assert_eq!(json["event"], expected);
        }

        let request = serde_json::to_value(ServerEvent::FriendRequest {
            from: "alice".to_string(),
            kind: FriendEventKind::Accepted,
        })
        .unwrap();
        assert_eq!(request["data"]["type"], "accepted");

        let typing = serde_json::to_value(ServerEvent::Typing {
            from: "alice".to_string(),
            is_typing: false,
        })
        .unwrap();
        assert_eq!(typing["data"]["isTyping"], false);
        assert_eq!(typing["data"]["from"], "alice");
    }
}
