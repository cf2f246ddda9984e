use std::sync::Arc;

use tracing::{debug, warn};

use chatchan_db::{PartitionRouter, StoreHandle, now_millis};
use chatchan_types::{AccountId, ChannelId, Message, MessageType};

use crate::directory::ChannelDirectory;
use crate::retry::RetryPolicy;
use crate::{ChatError, Settings};

/// Per-channel ordered, idempotent message log.
#[derive(Clone)]
pub struct MessageService {
    router: Arc<PartitionRouter>,
    channels: Arc<dyn ChannelDirectory>,
    retry: RetryPolicy,
    max_body_chars: usize,
    max_list_limit: u32,
}

impl MessageService {
    pub fn new(
        router: Arc<PartitionRouter>,
        channels: Arc<dyn ChannelDirectory>,
        settings: &Settings,
    ) -> Self {
        Self {
            router,
            channels,
            retry: settings.retry.clone(),
            max_body_chars: settings.max_body_chars,
            max_list_limit: settings.max_list_limit,
        }
    }

    /// Store a message at the next ordinal of `channel`.
    ///
    /// Re-submitting an idempotency key already used in the channel returns
    /// the originally stored message, whatever the new body says.
    pub async fn append(
        &self,
        channel: &ChannelId,
        sender: &AccountId,
        kind: MessageType,
        uuid: &str,
        body: &str,
    ) -> Result<Message, ChatError> {
        if uuid.trim().is_empty() {
            return Err(ChatError::BadRequest("idempotency key is empty".into()));
        }
        if body.is_empty() {
            return Err(ChatError::BadRequest("message body is empty".into()));
        }
        if body.chars().count() > self.max_body_chars {
            return Err(ChatError::BadRequest(format!(
                "message body exceeds {} characters",
                self.max_body_chars
            )));
        }

        let store = self.store_for(channel).await?;

        for attempt in 1..=self.retry.max_attempts() {
            let (u, c, s, b) = (
                uuid.to_string(),
                channel.to_string(),
                sender.to_string(),
                body.to_string(),
            );
            let inserted = store
                .run(move |db| db.insert_message(&u, kind.code(), &c, &s, &b, now_millis()))
                .await;

            match inserted {
                Ok(row_id) => {
                    debug!("Message {} stored in {} as row {}", uuid, channel, row_id);
                    return self.find(&store, channel, uuid).await?.ok_or_else(|| {
                        ChatError::DataIntegrity(format!(
                            "message {} in {} vanished after insert",
                            uuid, channel
                        ))
                    });
                }
                Err(e) if e.is_duplicate() => {
                    if let Some(existing) = self.find(&store, channel, uuid).await? {
                        debug!(
                            "Message {} already stored in {} at ordinal {}",
                            uuid, channel, existing.ordinal
                        );
                        return Ok(existing);
                    }
                    // Unique hit on the ordinal rather than the key: another
                    // writer took the same slot.
                    warn!(
                        "Ordinal collision appending {} to {} (attempt {})",
                        uuid, channel, attempt
                    );
                    self.retry.pause(attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ChatError::DataIntegrity(format!(
            "message {} in {}: neither inserted nor found after {} attempts",
            uuid,
            channel,
            self.retry.max_attempts()
        )))
    }

    /// Messages with an ordinal above `since_ordinal`, ascending.
    pub async fn list(
        &self,
        channel: &ChannelId,
        since_ordinal: i64,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ChatError> {
        if since_ordinal < 0 {
            return Err(ChatError::BadRequest(format!(
                "since must not be negative, got {}",
                since_ordinal
            )));
        }
        let limit = limit
            .unwrap_or(self.max_list_limit)
            .clamp(1, self.max_list_limit.max(1));

        let store = self.store_for(channel).await?;
        let c = channel.to_string();
        let rows = store
            .run(move |db| db.list_messages(&c, since_ordinal, limit))
            .await?;

        let messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub async fn get(&self, channel: &ChannelId, uuid: &str) -> Result<Message, ChatError> {
        let store = self.store_for(channel).await?;
        self.find(&store, channel, uuid)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("message {} in {}", uuid, channel)))
    }

    async fn store_for(&self, channel: &ChannelId) -> Result<StoreHandle, ChatError> {
        let partition = self.channels.channel_partition(channel).await?;
        Ok(self.router.executor_for(partition)?)
    }

    async fn find(
        &self,
        store: &StoreHandle,
        channel: &ChannelId,
        uuid: &str,
    ) -> Result<Option<Message>, ChatError> {
        let (c, u) = (channel.to_string(), uuid.to_string());
        let row = store.run(move |db| db.get_message(&c, &u)).await?;
        Ok(row.map(Message::try_from).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use chatchan_db::{RandomPartitioner, StorageConfig};
    use chatchan_types::ChannelKind;

    use super::*;
    use crate::directory::StaticDirectory;

    fn service(max_list_limit: u32) -> MessageService {
        let router = PartitionRouter::new(
            StorageConfig::all_in_one(chatchan_db::MEMORY_PATH, 2),
            RandomPartitioner,
        )
        .unwrap();
        let settings = Settings {
            retry: RetryPolicy::immediate(3),
            max_list_limit,
            max_body_chars: 10,
            ..Settings::default()
        };
        MessageService::new(Arc::new(router), Arc::new(StaticDirectory::new()), &settings)
    }

    fn alice() -> AccountId {
        AccountId::user("alice").unwrap()
    }

    #[tokio::test]
    async fn rejects_invalid_input() {
        let svc = service(10);
        let chan = ChannelId::new(ChannelKind::Dm, 1, 1);

        for (uuid, body) in [("", "hi"), ("u1", ""), ("u1", "far too long for ten")] {
            let err = svc
                .append(&chan, &alice(), MessageType::Text, uuid, body)
                .await
                .unwrap_err();
            assert!(matches!(err, ChatError::BadRequest(_)), "{uuid:?}/{body:?}: {err}");
        }

        assert!(matches!(
            svc.list(&chan, -1, None).await,
            Err(ChatError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn list_limit_is_clamped() {
        let svc = service(3);
        let chan = ChannelId::new(ChannelKind::Gr, 2, 2);
        for i in 0..5 {
            svc.append(&chan, &alice(), MessageType::Text, &format!("m{i}"), "x")
                .await
                .unwrap();
        }

        assert_eq!(svc.list(&chan, 0, Some(100)).await.unwrap().len(), 3);
        assert_eq!(svc.list(&chan, 0, Some(0)).await.unwrap().len(), 1);
        let tail = svc.list(&chan, 3, None).await.unwrap();
        assert_eq!(tail.iter().map(|m| m.ordinal).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[tokio::test]
    async fn zero_list_cap_still_returns_one_row() {
        let svc = service(0);
        let chan = ChannelId::new(ChannelKind::Gr, 3, 1);
        for i in 0..2 {
            svc.append(&chan, &alice(), MessageType::Text, &format!("m{i}"), "x")
                .await
                .unwrap();
        }

        assert_eq!(svc.list(&chan, 0, None).await.unwrap().len(), 1);
        assert_eq!(svc.list(&chan, 0, Some(5)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_partition_is_a_routing_error() {
        let svc = service(10);
        let chan = ChannelId::new(ChannelKind::Dm, 1, 9);
        let err = svc
            .append(&chan, &alice(), MessageType::Text, "u1", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Partition(_)));

        let missing = svc
            .get(&ChannelId::new(ChannelKind::Dm, 1, 1), "nope")
            .await
            .unwrap_err();
        assert!(matches!(missing, ChatError::NotFound(_)));
    }
}
