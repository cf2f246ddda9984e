use std::sync::Arc;

use tracing::debug;

use chatchan_db::{PartitionRouter, StoreError, StoreHandle, now_millis};
use chatchan_types::{AccountId, ChannelId, Message, Participant};

use crate::directory::AccountDirectory;
use crate::retry::RetryPolicy;
use crate::{ChatError, Settings};

/// Per-(account, channel) inbox state.
///
/// Rows live in the account's partition, so every operation starts by
/// resolving the account.
#[derive(Clone)]
pub struct ParticipantService {
    router: Arc<PartitionRouter>,
    accounts: Arc<dyn AccountDirectory>,
    retry: RetryPolicy,
}

enum ReadOutcome {
    Advanced,
    Unchanged,
    Missing,
}

impl ParticipantService {
    pub fn new(
        router: Arc<PartitionRouter>,
        accounts: Arc<dyn AccountDirectory>,
        settings: &Settings,
    ) -> Self {
        Self {
            router,
            accounts,
            retry: settings.retry.clone(),
        }
    }

    /// Create the participant, or reactivate a soft-deleted one under its
    /// original id.
    pub async fn link(&self, account: &AccountId, channel: &ChannelId) -> Result<i64, ChatError> {
        let store = self.store_for(account).await?;

        self.retry
            .run("link participant", |_| {
                let store = store.clone();
                let (a, c) = (account.to_string(), channel.to_string());
                async move {
                    let linked = store
                        .run(move |db| {
                            let now = now_millis();
                            match db.get_participant(&a, &c)? {
                                Some(row) if !row.is_deleted => Ok(Some(row.id)),
                                Some(row) => {
                                    db.set_participant_deleted(&a, &c, false, now)?;
                                    Ok(Some(row.id))
                                }
                                None => match db.insert_participant(&a, &c, now) {
                                    Ok(id) => Ok(Some(id)),
                                    Err(e) if e.is_duplicate() => Ok(None),
                                    Err(e) => Err(e),
                                },
                            }
                        })
                        .await?;
                    linked.ok_or_else(|| {
                        ChatError::RaceCondition("participant created concurrently".into())
                    })
                }
            })
            .await
            .inspect(|id| debug!("{} linked to {} as participant {}", account, channel, id))
    }

    pub async fn unlink(&self, account: &AccountId, channel: &ChannelId) -> Result<(), ChatError> {
        let store = self.store_for(account).await?;
        let (a, c) = (account.to_string(), channel.to_string());

        let affected = store
            .run(move |db| db.set_participant_deleted(&a, &c, true, now_millis()))
            .await?;
        if affected == 0 {
            return Err(ChatError::NotFound(format!(
                "active participant {} in {}",
                account, channel
            )));
        }
        debug!("{} unlinked from {}", account, channel);
        Ok(())
    }

    /// Project `message` into `account`'s inbox row for `channel`.
    ///
    /// Returns `false` when a concurrent writer won, in which case the caller
    /// should re-run the whole read-modify-write. Late deliveries of older
    /// messages succeed without touching the row.
    pub async fn apply_new_message(
        &self,
        account: &AccountId,
        channel: &ChannelId,
        message: &Message,
    ) -> Result<bool, ChatError> {
        if message.sender == *account {
            return Err(ChatError::BadRequest(format!(
                "{} is the sender of message {}",
                account, message.uuid
            )));
        }
        if message.channel_id != *channel {
            return Err(ChatError::BadRequest(format!(
                "message {} belongs to {}, not {}",
                message.uuid, message.channel_id, channel
            )));
        }

        let store = self.store_for(account).await?;
        let info = serde_json::to_string(&message.summary()).map_err(StoreError::from)?;
        let (a, c) = (account.to_string(), channel.to_string());
        let ordinal = message.ordinal;

        let applied = store
            .run(move |db| {
                let now = now_millis();
                match db.get_participant(&a, &c)? {
                    None => match db.insert_participant_with_message(&a, &c, ordinal, &info, now) {
                        Ok(_) => Ok(true),
                        Err(e) if e.is_duplicate() => Ok(false),
                        Err(e) => Err(e),
                    },
                    Some(row) if ordinal <= row.last_message_ordinal => Ok(true),
                    Some(row) => {
                        let affected =
                            db.update_participant_message(row.id, row.version, ordinal, &info, now)?;
                        Ok(affected == 1)
                    }
                }
            })
            .await?;

        if !applied {
            debug!(
                "Lost update race for {} in {} at ordinal {}",
                account, channel, ordinal
            );
        }
        Ok(applied)
    }

    /// Move the read marker forward to `through` (clamped to the last known
    /// message). Returns whether the stored marker advanced.
    pub async fn mark_read(
        &self,
        account: &AccountId,
        channel: &ChannelId,
        through: i64,
    ) -> Result<bool, ChatError> {
        if through < 0 {
            return Err(ChatError::BadRequest(format!(
                "read ordinal must not be negative, got {}",
                through
            )));
        }

        let store = self.store_for(account).await?;
        let (a, c) = (account.to_string(), channel.to_string());

        let outcome = store
            .run(move |db| {
                if db.update_participant_read(&a, &c, through, now_millis())? == 1 {
                    return Ok(ReadOutcome::Advanced);
                }
                match db.get_participant(&a, &c)? {
                    Some(row) if !row.is_deleted => Ok(ReadOutcome::Unchanged),
                    _ => Ok(ReadOutcome::Missing),
                }
            })
            .await?;

        match outcome {
            ReadOutcome::Advanced => Ok(true),
            ReadOutcome::Unchanged => Ok(false),
            ReadOutcome::Missing => Err(ChatError::NotFound(format!(
                "active participant {} in {}",
                account, channel
            ))),
        }
    }

    pub async fn list_for_account(&self, account: &AccountId) -> Result<Vec<Participant>, ChatError> {
        self.list(account, None).await
    }

    /// Participants updated strictly after `updated_since` (Unix ms).
    pub async fn list_for_account_since(
        &self,
        account: &AccountId,
        updated_since: i64,
    ) -> Result<Vec<Participant>, ChatError> {
        self.list(account, Some(updated_since)).await
    }

    pub async fn get(
        &self,
        account: &AccountId,
        channel: &ChannelId,
    ) -> Result<Option<Participant>, ChatError> {
        let store = self.store_for(account).await?;
        let (a, c) = (account.to_string(), channel.to_string());
        let row = store.run(move |db| db.get_participant(&a, &c)).await?;
        Ok(row.map(Participant::try_from).transpose()?)
    }

    async fn list(
        &self,
        account: &AccountId,
        updated_since: Option<i64>,
    ) -> Result<Vec<Participant>, ChatError> {
        let store = self.store_for(account).await?;
        let a = account.to_string();
        let rows = store
            .run(move |db| db.list_participants(&a, updated_since))
            .await?;

        let participants = rows
            .into_iter()
            .map(Participant::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(participants)
    }

    async fn store_for(&self, account: &AccountId) -> Result<StoreHandle, ChatError> {
        let partition = self.accounts.account_partition(account).await?;
        Ok(self.router.executor_for(partition)?)
    }
}
