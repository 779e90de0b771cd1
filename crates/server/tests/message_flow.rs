//! End-to-end conversation flow: persist, then fan out to whoever is online.

use std::sync::Arc;

use chrono::{Duration, Utc};
use server::error::Error;
use server::fanout::{FanoutRouter, ServerEvent};
use server::groups::GroupManager;
use server::models::{ChatTarget, Message};
use server::presence::{ConnectionHandle, PresenceTable};
use server::store::{self, MessageStore};
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Harness {
    _dir: TempDir,
    messages: MessageStore,
    presence: Arc<PresenceTable>,
    fanout: FanoutRouter,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let pool = store::connect(&dir.path().join("test.sqlite")).await.unwrap();
    let messages = MessageStore::new(pool.clone()).await.unwrap();
    let groups = Arc::new(GroupManager::new(pool).await.unwrap());
    let presence = Arc::new(PresenceTable::new());
    let fanout = FanoutRouter::new(presence.clone(), groups);
    Harness {
        _dir: dir,
        messages,
        presence,
        fanout,
    }
}

async fn connect(presence: &PresenceTable, user: &str) -> mpsc::Receiver<ServerEvent> {
    let (tx, rx) = mpsc::channel(16);
    presence.register(user, ConnectionHandle::new(tx)).await;
    rx
}

#[tokio::test]
async fn direct_send_delivers_exactly_once_to_the_receiver() {
    let h = harness().await;
    let mut alice_rx = connect(&h.presence, "alice").await;
    let mut bob_rx = connect(&h.presence, "bob").await;

    let msg = Message::compose(
        "alice",
        ChatTarget::direct("bob"),
        Some("hi".to_string()),
        None,
        None,
    )
    .unwrap();
    h.messages.save(&msg).await.unwrap();
    h.fanout
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
    assert!(bob_rx.try_recv().is_err(), "delivered more than once");
    assert!(alice_rx.try_recv().is_err(), "sender is not a recipient");
}

#[tokio::test]
async fn stale_edit_is_rejected_and_nothing_is_emitted() {
    let h = harness().await;
    let mut bob_rx = connect(&h.presence, "bob").await;

    let mut msg = Message::compose(
        "alice",
        ChatTarget::direct("bob"),
        Some("original".to_string()),
        None,
        None,
    )
    .unwrap();
    msg.created_at = Utc::now() - Duration::minutes(6);
    h.messages.save(&msg).await.unwrap();

    // The handler sequence: a failed edit never reaches the fanout step.
    let err = h.messages.edit(&msg.id, "alice", "changed").await;
    assert!(matches!(err, Err(Error::WindowExpired)));

    let unchanged = h.messages.get(&msg.id).await.unwrap();
    assert_eq!(unchanged.text.as_deref(), Some("original"));
    assert!(!unchanged.edited);
    assert!(bob_rx.try_recv().is_err(), "no edit event may be emitted");
}

#[tokio::test]
async fn offline_receiver_still_gets_the_message_persisted() {
    let h = harness().await;
    let mut alice_rx = connect(&h.presence, "alice").await;
    // bob never connects

    let msg = Message::compose(
        "alice",
        ChatTarget::direct("bob"),
        Some("hi".to_string()),
        None,
        None,
    )
    .unwrap();
    h.messages.save(&msg).await.unwrap();
    h.fanout
        .deliver_for_message(&msg, ServerEvent::NewMessage(msg.clone()))
        .await
        .unwrap();

    assert!(alice_rx.try_recv().is_err(), "no event reaches anyone");

    // A later history fetch by bob returns the message.
    let mut history = h.messages.direct_history("bob", "alice", 1, 50).await.unwrap();
    history.reverse();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text.as_deref(), Some("hi"));
}

#[tokio::test]
async fn delete_fans_out_only_the_message_id() {
    let h = harness().await;
    let mut bob_rx = connect(&h.presence, "bob").await;

    let msg = Message::compose(
        "alice",
        ChatTarget::direct("bob"),
        Some("oops".to_string()),
        None,
        None,
    )
    .unwrap();
    h.messages.save(&msg).await.unwrap();

    let deleted = h.messages.delete(&msg.id, "alice").await.unwrap();
    h.fanout
        .deliver_for_message(&deleted, ServerEvent::MessageDeleted(deleted.id.clone()))
        .await
        .unwrap();

    match bob_rx.try_recv().unwrap() {
        ServerEvent::MessageDeleted(id) => assert_eq!(id, msg.id),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn reconnect_does_not_lose_the_newer_connection() {
    let h = harness().await;

    let (tx_old, mut rx_old) = mpsc::channel(16);
    let old = ConnectionHandle::new(tx_old);
    let old_id = old.id().to_string();
    h.presence.register("bob", old).await;

    let (tx_new, mut rx_new) = mpsc::channel(16);
    h.presence.register("bob", ConnectionHandle::new(tx_new)).await;

    // The old socket's disconnect arrives late; the guard ignores it.
    h.presence.unregister("bob", &old_id).await;

    let msg = Message::compose(
        "alice",
        ChatTarget::direct("bob"),
        Some("hi".to_string()),
        None,
        None,
    )
    .unwrap();
    h.messages.save(&msg).await.unwrap();
    h.fanout
        .deliver_for_message(&msg, ServerEvent::NewMessage(msg.clone()))
        .await
        .unwrap();

    assert!(rx_old.try_recv().is_err());
    assert!(matches!(
        rx_new.try_recv().unwrap(),
        ServerEvent::NewMessage(_)
    ));
}
