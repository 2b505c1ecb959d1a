//! End-to-end scenarios over a fully wired engine

use chatter_core::core_sync::DeliveryState;
use chatter_core::test_utils::{alice, bob, client_id, TestEngineBuilder};
use chatter_core::{Cursor, LogError, MirrorStore, SyncError};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_alice_and_bob_exchange_messages() {
    let engine = TestEngineBuilder::new().build();

    let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

    engine.coordinator.send(&key, &alice(), "m1", "hi").await.unwrap();
    engine.coordinator.send(&key, &bob(), "m2", "hello").await.unwrap();

    let history = engine.log.read_since(&key, Cursor::ZERO).unwrap();
    assert_eq!(
        history.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
        vec!["hi", "hello"]
    );

    for owner in [alice(), bob()] {
        let list = engine.mirrors.list(&owner).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].last_message_text, "hello");
    }

    // both mirrors and the conversation agree once the send settled
    let conversation = engine.log.get_conversation(&key).unwrap().unwrap();
    assert_eq!(conversation.last_message_text, "hello");
    let alice_entry = engine.mirrors.get(&alice(), &key).unwrap().unwrap();
    let bob_entry = engine.mirrors.get(&bob(), &key).unwrap().unwrap();
    assert_eq!(alice_entry.updated_at, bob_entry.updated_at);
    assert_eq!(alice_entry.updated_at, conversation.updated_at);
}

#[tokio::test]
async fn test_send_twice_with_same_client_id_stores_once() {
    let engine = TestEngineBuilder::new().build();
    let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

    let first = engine.coordinator.send(&key, &alice(), "m1", "hi").await.unwrap();
    let second = engine.coordinator.send(&key, &alice(), "m1", "hi").await.unwrap();

    assert!(second.duplicate);
    assert_eq!(second.message, first.message);
    assert_eq!(engine.log.read_since(&key, Cursor::ZERO).unwrap().len(), 1);
}

#[tokio::test]
async fn test_whitespace_message_is_rejected_without_side_effects() {
    let engine = TestEngineBuilder::new().build();
    let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

    let err = engine.coordinator.send(&key, &alice(), "m1", "   ").await.unwrap_err();
    assert!(matches!(err, SyncError::Log(LogError::EmptyMessage)));

    assert!(engine.log.read_since(&key, Cursor::ZERO).unwrap().is_empty());
    for owner in [alice(), bob()] {
        let list = engine.mirrors.list(&owner).unwrap();
        assert_eq!(list[0].last_message_text, "");
    }
}

#[tokio::test]
async fn test_concurrent_first_contact_creates_one_conversation() {
    let engine = Arc::new(TestEngineBuilder::new().build());

    let from_alice = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.coordinator.open_conversation(&alice(), &bob()).await })
    };
    let from_bob = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.coordinator.open_conversation(&bob(), &alice()).await })
    };

    let key_a = from_alice.await.unwrap().unwrap();
    let key_b = from_bob.await.unwrap().unwrap();

    assert_eq!(key_a, key_b);
    assert_eq!(engine.log.list_conversations().unwrap().len(), 1);
}

#[tokio::test]
async fn test_racing_first_sends_create_one_conversation() {
    let engine = Arc::new(TestEngineBuilder::new().build());
    let key = chatter_core::ConversationKey::derive(&alice(), &bob()).unwrap();

    let send_a = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move { engine.coordinator.send(&key, &alice(), "a1", "hi bob").await })
    };
    let send_b = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move { engine.coordinator.send(&key, &bob(), "b1", "hi alice").await })
    };

    send_a.await.unwrap().unwrap();
    send_b.await.unwrap().unwrap();

    assert_eq!(engine.log.list_conversations().unwrap().len(), 1);
    assert_eq!(engine.log.read_since(&key, Cursor::ZERO).unwrap().len(), 2);
}

#[tokio::test]
async fn test_mirror_failure_converges_through_reconciliation() {
    let engine = TestEngineBuilder::new().build();
    let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

    // every upsert against bob's entry fails until retries are exhausted
    engine.mirrors.fail_upserts_for(bob(), 100);

    let receipt = engine.coordinator.send(&key, &alice(), "m1", "hi").await.unwrap();
    assert_eq!(receipt.delivery, DeliveryState::DeliveryDelayed);

    // message is durable despite the lagging summary
    assert_eq!(engine.log.read_since(&key, Cursor::ZERO).unwrap().len(), 1);
    let stale = engine.mirrors.get(&bob(), &key).unwrap().unwrap();
    assert_eq!(stale.last_message_text, "");

    // store recovers; the next reconciliation round repairs bob's side
    engine.mirrors.fail_upserts_for(bob(), 0);
    let stats = engine.reconciler.run_once().await.unwrap();
    assert_eq!(stats.mirrors_repaired, 1);

    let alice_entry = engine.mirrors.get(&alice(), &key).unwrap().unwrap();
    let bob_entry = engine.mirrors.get(&bob(), &key).unwrap().unwrap();
    assert_eq!(bob_entry.last_message_text, "hi");
    assert_eq!(bob_entry.updated_at, alice_entry.updated_at);
}

#[tokio::test]
async fn test_reconciler_background_loop_converges() {
    let engine = Arc::new(TestEngineBuilder::new().build());
    let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

    engine.mirrors.fail_upserts_for(bob(), 100);
    engine.coordinator.send(&key, &alice(), "m1", "hi").await.unwrap();
    engine.mirrors.fail_upserts_for(bob(), 0);

    let shutdown = Arc::new(chatter_core::shutdown::ShutdownCoordinator::new());
    let task = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.reconciler.run(&shutdown).await })
    };

    let converged = chatter_core::test_utils::wait_until(Duration::from_secs(2), || {
        engine
            .mirrors
            .get(&bob(), &key)
            .ok()
            .flatten()
            .is_some_and(|e| e.last_message_text == "hi")
    })
    .await;
    assert!(converged, "reconciler never repaired bob's mirror");

    shutdown.shutdown().await;
    task.await.unwrap();
}

#[tokio::test]
async fn test_delivery_delayed_message_still_reaches_subscribers() {
    let engine = TestEngineBuilder::new().build();
    let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

    let mut sub = engine.coordinator.subscribe_messages(&key, Cursor::ZERO).await.unwrap();
    assert!(sub.snapshot().is_empty());

    engine.mirrors.fail_next_upserts(100);
    let receipt = engine
        .coordinator
        .send(&key, &alice(), &client_id(), "still visible")
        .await
        .unwrap();
    assert_eq!(receipt.delivery, DeliveryState::DeliveryDelayed);

    let received = chatter_core::test_utils::with_timeout(Duration::from_secs(1), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.text, "still visible");
}
