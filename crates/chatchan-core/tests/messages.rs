mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chatchan_core::{ChatError, ChatServices, StaticDirectory};
use chatchan_types::{ChannelId, ChannelKind, MessageType};

use common::{file_router, fixture, settings, user};

#[tokio::test]
async fn resubmitted_key_returns_the_original_message() {
    let f = fixture(settings());
    let messages = f.services.messages();

    let first = messages
        .append(&f.dm, &f.alice, MessageType::Text, "k1", "original")
        .await
        .unwrap();
    let again = messages
        .append(&f.dm, &f.alice, MessageType::Text, "k1", "edited")
        .await
        .unwrap();

    assert_eq!(again, first);
    assert_eq!(again.body, "original");

    let stored = messages.list(&f.dm, 0, None).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn same_key_in_another_channel_is_a_new_message() {
    let f = fixture(settings());
    let other = ChannelId::new(ChannelKind::Gr, 8, 1);
    let messages = f.services.messages();

    let a = messages
        .append(&f.dm, &f.alice, MessageType::Text, "k1", "one")
        .await
        .unwrap();
    let b = messages
        .append(&other, &f.alice, MessageType::Text, "k1", "two")
        .await
        .unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!((a.ordinal, b.ordinal), (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_get_gapless_ordinals() {
    let f = fixture(settings());
    let mut tasks = Vec::new();

    for i in 0..32 {
        let services = f.services.clone();
        let (dm, alice) = (f.dm, f.alice.clone());
        tasks.push(tokio::spawn(async move {
            services
                .messages()
                .append(&dm, &alice, MessageType::Text, &format!("m{i}"), "x")
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let ordinals: Vec<i64> = f
        .services
        .messages()
        .list(&f.dm, 0, Some(150))
        .await
        .unwrap()
        .iter()
        .map(|m| m.ordinal)
        .collect();
    assert_eq!(ordinals, (1..=32).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_processes_sharing_a_store_never_reuse_an_ordinal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chatchan.db");
    let channel = ChannelId::new(ChannelKind::Gr, 3, 1);
    let alice = user("alice");

    let instances: Vec<ChatServices> = (0..2)
        .map(|_| {
            let directory = Arc::new(StaticDirectory::new());
            ChatServices::with_directories(
                file_router(&path),
                directory.clone(),
                directory,
                settings(),
            )
        })
        .collect();

    // Open both stores up front so the schema is created before any race.
    for services in &instances {
        services.messages().list(&channel, 0, None).await.unwrap();
    }

    let mut tasks = Vec::new();
    for (n, services) in instances.iter().enumerate() {
        for i in 0..12 {
            let services = services.clone();
            let alice = alice.clone();
            tasks.push(tokio::spawn(async move {
                services
                    .messages()
                    .append(&channel, &alice, MessageType::Text, &format!("p{n}-{i}"), "x")
                    .await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let listed = instances[1]
        .messages()
        .list(&channel, 0, Some(150))
        .await
        .unwrap();
    let ordinals: Vec<i64> = listed.iter().map(|m| m.ordinal).collect();
    assert_eq!(ordinals, (1..=24).collect::<Vec<_>>());

    let keys: HashSet<&str> = listed.iter().map(|m| m.uuid.as_str()).collect();
    assert_eq!(keys.len(), 24);
}

#[tokio::test]
async fn only_members_may_post_or_read() {
    let f = fixture(settings());
    let mallory = user("mallory");

    let err = f
        .services
        .post_message(&f.dm, &mallory, MessageType::Text, "k1", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotAllowed(_)));

    let err = f
        .services
        .list_messages(&f.dm, &mallory, 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotAllowed(_)));

    let unknown = ChannelId::new(ChannelKind::Gr, 99, 1);
    let err = f
        .services
        .list_messages(&unknown, &f.alice, 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn post_queues_one_fanout_per_submission() {
    let f = fixture(settings());

    f.services
        .post_message(&f.dm, &f.alice, MessageType::Text, "k1", "hi")
        .await
        .unwrap();
    f.services
        .post_message(&f.dm, &f.alice, MessageType::Text, "k1", "hi again")
        .await
        .unwrap();

    assert_eq!(f.services.queue().depth().await.unwrap(), 2);
    let listed = f
        .services
        .list_messages(&f.dm, &f.bob, 0, None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].body, "hi");
}
