mod common;

use std::time::Duration;

use chatchan_core::ChatError;
use chatchan_types::{ChannelId, ChannelKind, Message, MessageType};

use common::{Fixture, fixture, settings, user};

async fn post(f: &Fixture, uuid: &str, body: &str) -> Message {
    f.services
        .messages()
        .append(&f.dm, &f.alice, MessageType::Text, uuid, body)
        .await
        .unwrap()
}

#[tokio::test]
async fn read_marker_never_moves_backwards() {
    let f = fixture(settings());
    let participants = f.services.participants();
    for i in 1..=5 {
        let m = post(&f, &format!("m{i}"), "x").await;
        assert!(participants.apply_new_message(&f.bob, &f.dm, &m).await.unwrap());
    }

    assert!(participants.mark_read(&f.bob, &f.dm, 5).await.unwrap());
    assert!(!participants.mark_read(&f.bob, &f.dm, 4).await.unwrap());

    let p = participants.get(&f.bob, &f.dm).await.unwrap().unwrap();
    assert_eq!(p.last_read_ordinal, 5);
    assert_eq!(p.unread_count(), 0);
}

#[tokio::test]
async fn read_marker_is_clamped_to_last_message() {
    let f = fixture(settings());
    let participants = f.services.participants();
    let m = post(&f, "m1", "x").await;
    participants.apply_new_message(&f.bob, &f.dm, &m).await.unwrap();

    assert!(participants.mark_read(&f.bob, &f.dm, 40).await.unwrap());
    let p = participants.get(&f.bob, &f.dm).await.unwrap().unwrap();
    assert_eq!(p.last_read_ordinal, 1);
    assert!(p.last_read_ordinal <= p.last_message_ordinal);

    assert!(matches!(
        participants.mark_read(&f.bob, &f.dm, -1).await,
        Err(ChatError::BadRequest(_))
    ));
    let nowhere = ChannelId::new(ChannelKind::Gr, 77, 2);
    assert!(matches!(
        participants.mark_read(&f.bob, &nowhere, 1).await,
        Err(ChatError::NotFound(_))
    ));
}

#[tokio::test]
async fn late_delivery_keeps_the_newest_summary() {
    let f = fixture(settings());
    let participants = f.services.participants();
    let _m1 = post(&f, "m1", "first").await;
    let m2 = post(&f, "m2", "second").await;
    let m3 = post(&f, "m3", "third").await;

    assert!(participants.apply_new_message(&f.bob, &f.dm, &m3).await.unwrap());
    assert!(participants.apply_new_message(&f.bob, &f.dm, &m2).await.unwrap());

    let p = participants.get(&f.bob, &f.dm).await.unwrap().unwrap();
    assert_eq!(p.last_message_ordinal, 3);
    let summary = p.summary.unwrap();
    assert_eq!(summary.preview, "third");
    assert_eq!(summary.message_uuid, "m3");
    assert_eq!(summary.sender, f.alice);
    assert_eq!(p.version, 0);
}

#[tokio::test]
async fn newer_message_bumps_version() {
    let f = fixture(settings());
    let participants = f.services.participants();
    let m1 = post(&f, "m1", "first").await;
    let m2 = post(&f, "m2", "second").await;

    participants.apply_new_message(&f.bob, &f.dm, &m1).await.unwrap();
    participants.apply_new_message(&f.bob, &f.dm, &m2).await.unwrap();
    // Redelivery of the same message changes nothing.
    participants.apply_new_message(&f.bob, &f.dm, &m2).await.unwrap();

    let p = participants.get(&f.bob, &f.dm).await.unwrap().unwrap();
    assert_eq!((p.last_message_ordinal, p.version), (2, 1));
}

#[tokio::test]
async fn sender_is_never_projected() {
    let f = fixture(settings());
    let m = post(&f, "m1", "x").await;

    let err = f
        .services
        .participants()
        .apply_new_message(&f.alice, &f.dm, &m)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::BadRequest(_)));
}

#[tokio::test]
async fn relink_reactivates_the_same_row() {
    let f = fixture(settings());
    let participants = f.services.participants();

    let id = participants.link(&f.bob, &f.dm).await.unwrap();
    assert_eq!(participants.link(&f.bob, &f.dm).await.unwrap(), id);

    participants.unlink(&f.bob, &f.dm).await.unwrap();
    assert!(participants.list_for_account(&f.bob).await.unwrap().is_empty());
    assert!(matches!(
        participants.unlink(&f.bob, &f.dm).await,
        Err(ChatError::NotFound(_))
    ));

    assert_eq!(participants.link(&f.bob, &f.dm).await.unwrap(), id);
    let listed = participants.list_for_account(&f.bob).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
}

#[tokio::test]
async fn incremental_sync_returns_only_newer_updates() {
    let f = fixture(settings());
    let participants = f.services.participants();
    let group = ChannelId::new(ChannelKind::Gr, 5, 1);

    participants.link(&f.bob, &f.dm).await.unwrap();
    let first = participants.list_for_account(&f.bob).await.unwrap();
    let cursor = first[0].updated_at.timestamp_millis();

    tokio::time::sleep(Duration::from_millis(5)).await;
    participants.link(&f.bob, &group).await.unwrap();

    let changed = participants
        .list_for_account_since(&f.bob, cursor)
        .await
        .unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].channel_id, group);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let m = post(&f, "m1", "ping").await;
    participants.apply_new_message(&f.bob, &f.dm, &m).await.unwrap();

    let changed = participants
        .list_for_account_since(&f.bob, changed[0].updated_at.timestamp_millis())
        .await
        .unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].channel_id, f.dm);
}

#[tokio::test]
async fn back_to_back_changes_each_move_the_sync_cursor() {
    let f = fixture(settings());
    let participants = f.services.participants();
    let m = post(&f, "m1", "ping").await;

    participants.link(&f.bob, &f.dm).await.unwrap();
    let linked = participants.get(&f.bob, &f.dm).await.unwrap().unwrap();
    let cursor = linked.updated_at.timestamp_millis();

    // No pause: these usually land in the same millisecond as the link.
    participants.apply_new_message(&f.bob, &f.dm, &m).await.unwrap();
    let changed = participants.list_for_account_since(&f.bob, cursor).await.unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].last_message_ordinal, 1);

    let cursor = changed[0].updated_at.timestamp_millis();
    assert!(participants.mark_read(&f.bob, &f.dm, 1).await.unwrap());
    let changed = participants.list_for_account_since(&f.bob, cursor).await.unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].last_read_ordinal, 1);
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let f = fixture(settings());
    let err = f
        .services
        .participants()
        .link(&user("ghost"), &f.dm)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}
