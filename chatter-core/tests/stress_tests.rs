//! Concurrency stress tests: ordering under contention

use chatter_core::test_utils::{alice, bob, TestEngineBuilder};
use chatter_core::{Cursor, MirrorStore, ParticipantId, Profile};
use std::sync::Arc;
use std::time::Duration;

/// Concurrent senders on one conversation: every subscriber observes the
/// same total order, consistent with server-assigned cursors
#[tokio::test]
async fn test_concurrent_sends_yield_one_total_order() {
    const SENDS_PER_SIDE: usize = 20;

    let engine = Arc::new(TestEngineBuilder::new().build());
    let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

    let mut sub_one = engine.coordinator.subscribe_messages(&key, Cursor::ZERO).await.unwrap();
    let mut sub_two = engine.coordinator.subscribe_messages(&key, Cursor::ZERO).await.unwrap();

    let alice_task = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move {
            for i in 0..SENDS_PER_SIDE {
                engine
                    .coordinator
                    .send(&key, &alice(), &format!("a{}", i), &format!("from alice {}", i))
                    .await
                    .unwrap();
            }
        })
    };
    let bob_task = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move {
            for i in 0..SENDS_PER_SIDE {
                engine
                    .coordinator
                    .send(&key, &bob(), &format!("b{}", i), &format!("from bob {}", i))
                    .await
                    .unwrap();
            }
        })
    };

    alice_task.await.unwrap();
    bob_task.await.unwrap();

    let total = SENDS_PER_SIDE * 2;
    let mut seen_one = Vec::with_capacity(total);
    let mut seen_two = Vec::with_capacity(total);
    for _ in 0..total {
        seen_one.push(
            tokio::time::timeout(Duration::from_secs(2), sub_one.next())
                .await
                .expect("subscriber one starved")
                .unwrap(),
        );
        seen_two.push(
            tokio::time::timeout(Duration::from_secs(2), sub_two.next())
                .await
                .expect("subscriber two starved")
                .unwrap(),
        );
    }

    // identical order across subscribers
    let order_one: Vec<_> = seen_one.iter().map(|m| m.client_message_id.clone()).collect();
    let order_two: Vec<_> = seen_two.iter().map(|m| m.client_message_id.clone()).collect();
    assert_eq!(order_one, order_two);

    // strictly increasing cursors
    for pair in seen_one.windows(2) {
        assert!(pair[0].cursor() < pair[1].cursor());
    }

    // and the durable log agrees with what subscribers saw
    let stored: Vec<_> = engine
        .log
        .read_since(&key, Cursor::ZERO)
        .unwrap()
        .into_iter()
        .map(|m| m.client_message_id)
        .collect();
    assert_eq!(stored, order_one);
}

/// Independent conversations append in parallel without interference
#[tokio::test]
async fn test_parallel_conversations_are_independent() {
    const PAIRS: usize = 8;
    const MESSAGES: usize = 10;

    let mut builder = TestEngineBuilder::new();
    for i in 0..PAIRS {
        builder = builder
            .with_profile(Profile::new(format!("user{}", i), format!("User {}", i)));
    }
    let engine = Arc::new(builder.build());

    let tasks: Vec<_> = (0..PAIRS)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let me = ParticipantId::new(format!("user{}", i));
                let key = engine.coordinator.open_conversation(&me, &alice()).await.unwrap();
                for n in 0..MESSAGES {
                    engine
                        .coordinator
                        .send(&key, &me, &format!("m{}", n), &format!("message {}", n))
                        .await
                        .unwrap();
                }
                key
            })
        })
        .collect();

    let keys: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(engine.log.list_conversations().unwrap().len(), PAIRS);
    for key in &keys {
        let history = engine.log.read_since(key, Cursor::ZERO).unwrap();
        assert_eq!(history.len(), MESSAGES);
        for pair in history.windows(2) {
            assert!(pair[0].cursor() < pair[1].cursor());
        }
    }

    // alice talked to everyone; her list has one row per pair
    let list = engine.mirrors.list(&alice()).unwrap();
    assert_eq!(list.len(), PAIRS);
    for pair in list.windows(2) {
        assert!(pair[0].updated_at >= pair[1].updated_at);
    }
}

/// Duplicate client ids racing from two tasks still store exactly once
#[tokio::test]
async fn test_racing_duplicate_sends_store_once() {
    let engine = Arc::new(TestEngineBuilder::new().build());
    let key = engine.coordinator.open_conversation(&alice(), &bob()).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            engine.coordinator.send(&key, &alice(), "same-id", "hi").await.unwrap()
        }));
    }

    let mut fresh = 0;
    for task in tasks {
        let receipt = task.await.unwrap();
        if !receipt.duplicate {
            fresh += 1;
        }
    }

    assert_eq!(fresh, 1);
    assert_eq!(engine.log.read_since(&key, Cursor::ZERO).unwrap().len(), 1);
}
