//! Channel and account lookups the write path depends on.
//!
//! The fan-out path only needs three answers: which partition a channel's
//! messages live in, who the channel's members are, and which partition an
//! account's participant rows live in. [`CoreDirectory`] answers them from
//! the core store; [`StaticDirectory`] answers them from memory.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use chatchan_db::{PartitionRouter, StoreError, now_millis};
use chatchan_types::{AccountId, ChannelId, ChannelKind};

use crate::ChatError;

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn channel_partition(&self, channel: &ChannelId) -> Result<u32, ChatError> {
        Ok(channel.partition)
    }

    async fn channel_members(&self, channel: &ChannelId) -> Result<Vec<AccountId>, ChatError>;

    /// Create a channel whose members are `owner` plus `members`.
    async fn create_channel(
        &self,
        kind: ChannelKind,
        owner: &AccountId,
        members: &[AccountId],
    ) -> Result<ChannelId, ChatError>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn account_partition(&self, account: &AccountId) -> Result<u32, ChatError>;

    /// Place `account` on a partition. An existing placement wins.
    async fn register_account(&self, account: &AccountId) -> Result<u32, ChatError>;
}

/// Owner first, then the other members once each. A DM has exactly two.
fn roster(
    kind: ChannelKind,
    owner: &AccountId,
    members: &[AccountId],
) -> Result<Vec<AccountId>, ChatError> {
    let mut all = vec![owner.clone()];
    for member in members {
        if !all.contains(member) {
            all.push(member.clone());
        }
    }

    if kind == ChannelKind::Dm && all.len() != 2 {
        return Err(ChatError::BadRequest(format!(
            "a direct-message channel needs exactly two members, got {}",
            all.len()
        )));
    }
    Ok(all)
}

/// Directory backed by the `accounts` and `channels` tables of the core store.
#[derive(Clone)]
pub struct CoreDirectory {
    router: Arc<PartitionRouter>,
}

impl CoreDirectory {
    pub fn new(router: Arc<PartitionRouter>) -> Self {
        Self { router }
    }

    /// Place an account on a partition. Registering twice keeps the first
    /// placement.
    pub async fn register_account(&self, account: &AccountId) -> Result<u32, ChatError> {
        let name = account.to_string();
        let chosen = self.router.choose_partition(&name);
        let core = self.router.core()?;

        let partition = core
            .run(move |db| db.register_account(&name, chosen, now_millis()))
            .await?;
        debug!("Account {} registered on partition {}", account, partition);
        Ok(partition)
    }

    /// Create a channel whose members are `owner` plus `members`.
    pub async fn create_channel(
        &self,
        kind: ChannelKind,
        owner: &AccountId,
        members: &[AccountId],
    ) -> Result<ChannelId, ChatError> {
        let all = roster(kind, owner, members)?;
        let owner_id = owner.to_string();
        let partition = self.router.choose_partition(&owner_id);
        let member_list = serde_json::to_string(&all).map_err(StoreError::from)?;
        let core = self.router.core()?;

        let id = core
            .run(move |db| {
                db.insert_channel(kind.as_str(), partition, &owner_id, &member_list, now_millis())
            })
            .await?;

        let channel = ChannelId::new(kind, id, partition);
        info!("Channel {} created with {} members", channel, all.len());
        Ok(channel)
    }

    pub async fn remove_channel(&self, channel: &ChannelId) -> Result<(), ChatError> {
        let id = channel.id;
        let core = self.router.core()?;
        let affected = core.run(move |db| db.soft_delete_channel(id)).await?;
        if affected == 0 {
            return Err(ChatError::NotFound(format!("channel {}", channel)));
        }
        info!("Channel {} removed", channel);
        Ok(())
    }
}

#[async_trait]
impl ChannelDirectory for CoreDirectory {
    async fn channel_members(&self, channel: &ChannelId) -> Result<Vec<AccountId>, ChatError> {
        let id = channel.id;
        let core = self.router.core()?;
        let row = core.run(move |db| db.get_channel(id)).await?;

        let row = match row {
            Some(row)
                if !row.is_deleted
                    && row.kind == channel.kind.as_str()
                    && row.partition == i64::from(channel.partition) =>
            {
                row
            }
            _ => return Err(ChatError::NotFound(format!("channel {}", channel))),
        };

        let members: Vec<AccountId> =
            serde_json::from_str(&row.member_list).map_err(StoreError::from)?;
        Ok(members)
    }

    async fn create_channel(
        &self,
        kind: ChannelKind,
        owner: &AccountId,
        members: &[AccountId],
    ) -> Result<ChannelId, ChatError> {
        CoreDirectory::create_channel(self, kind, owner, members).await
    }
}

#[async_trait]
impl AccountDirectory for CoreDirectory {
    async fn account_partition(&self, account: &AccountId) -> Result<u32, ChatError> {
        let name = account.to_string();
        let core = self.router.core()?;
        core.run(move |db| db.account_partition(&name))
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("account {}", account)))
    }

    async fn register_account(&self, account: &AccountId) -> Result<u32, ChatError> {
        CoreDirectory::register_account(self, account).await
    }
}

/// In-memory directory for tests and single-store tooling.
#[derive(Default)]
pub struct StaticDirectory {
    channels: RwLock<HashMap<ChannelId, Vec<AccountId>>>,
    accounts: RwLock<HashMap<AccountId, u32>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_members(&self, channel: ChannelId, members: Vec<AccountId>) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, members);
    }

    pub fn remove_channel(&self, channel: &ChannelId) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
    }

    pub fn set_account_partition(&self, account: AccountId, partition: u32) {
        self.accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account, partition);
    }
}

#[async_trait]
impl ChannelDirectory for StaticDirectory {
    async fn channel_members(&self, channel: &ChannelId) -> Result<Vec<AccountId>, ChatError> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("channel {}", channel)))
    }

    /// Channels land on the owner's partition with the next free id.
    async fn create_channel(
        &self,
        kind: ChannelKind,
        owner: &AccountId,
        members: &[AccountId],
    ) -> Result<ChannelId, ChatError> {
        let all = roster(kind, owner, members)?;
        let partition = self.account_partition(owner).await?;

        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let id = channels.keys().map(|c| c.id).max().unwrap_or(0) + 1;
        let channel = ChannelId::new(kind, id, partition);
        channels.insert(channel, all);
        Ok(channel)
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn account_partition(&self, account: &AccountId) -> Result<u32, ChatError> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account)
            .copied()
            .ok_or_else(|| ChatError::NotFound(format!("account {}", account)))
    }

    /// Placements are preset with `set_account_partition`; registering only
    /// confirms one exists.
    async fn register_account(&self, account: &AccountId) -> Result<u32, ChatError> {
        self.account_partition(account).await
    }
}
