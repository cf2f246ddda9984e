pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod participants;
pub mod queue;
pub mod retry;

use std::sync::Arc;

use tracing::debug;

use chatchan_db::PartitionRouter;
use chatchan_types::events::WorkEvent;
use chatchan_types::{AccountId, ChannelId, ChannelKind, Message, MessageType};

pub use config::Settings;
pub use directory::{AccountDirectory, ChannelDirectory, CoreDirectory, StaticDirectory};
pub use dispatcher::{Dispatch, EventHandler, FanoutDispatcher, SendMessageHandler};
pub use error::ChatError;
pub use messages::MessageService;
pub use participants::ParticipantService;
pub use queue::{Activity, QueueConfig, QueueEvent, WorkQueue};
pub use retry::RetryPolicy;

/// Everything the write path needs, wired together once per process.
#[derive(Clone)]
pub struct ChatServices {
    router: Arc<PartitionRouter>,
    channels: Arc<dyn ChannelDirectory>,
    accounts: Arc<dyn AccountDirectory>,
    messages: MessageService,
    participants: ParticipantService,
    queue: WorkQueue,
    settings: Settings,
}

impl ChatServices {
    /// Services whose directory lives in the core store.
    pub fn new(router: Arc<PartitionRouter>, settings: Settings) -> Self {
        let directory = Arc::new(CoreDirectory::new(router.clone()));
        Self::with_directories(router, directory.clone(), directory, settings)
    }

    pub fn with_directories(
        router: Arc<PartitionRouter>,
        channels: Arc<dyn ChannelDirectory>,
        accounts: Arc<dyn AccountDirectory>,
        settings: Settings,
    ) -> Self {
        let messages = MessageService::new(router.clone(), channels.clone(), &settings);
        let participants = ParticipantService::new(router.clone(), accounts.clone(), &settings);
        let queue = WorkQueue::new(
            router.clone(),
            QueueConfig {
                staleness: settings.queue_staleness,
                retry: settings.retry.clone(),
            },
        );

        Self {
            router,
            channels,
            accounts,
            messages,
            participants,
            queue,
            settings,
        }
    }

    pub fn router(&self) -> &Arc<PartitionRouter> {
        &self.router
    }

    pub fn messages(&self) -> &MessageService {
        &self.messages
    }

    pub fn participants(&self) -> &ParticipantService {
        &self.participants
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Store a message from a channel member and queue its fan-out.
    ///
    /// A retried post returns the original message and queues the fan-out
    /// again, which the handler absorbs.
    pub async fn post_message(
        &self,
        channel: &ChannelId,
        sender: &AccountId,
        kind: MessageType,
        uuid: &str,
        body: &str,
    ) -> Result<Message, ChatError> {
        self.require_member(channel, sender).await?;

        let message = self.messages.append(channel, sender, kind, uuid, body).await?;
        self.queue
            .push(&WorkEvent::send_message(&message.uuid, message.channel_id))
            .await?;
        Ok(message)
    }

    pub async fn list_messages(
        &self,
        channel: &ChannelId,
        reader: &AccountId,
        since_ordinal: i64,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ChatError> {
        self.require_member(channel, reader).await?;
        self.messages.list(channel, since_ordinal, limit).await
    }

    /// Place the account on a partition so it can hold participant rows.
    pub async fn register_account(&self, account: &AccountId) -> Result<u32, ChatError> {
        let partition = self.accounts.register_account(account).await?;
        debug!("{} placed on partition {}", account, partition);
        Ok(partition)
    }

    /// Open a DM between two registered accounts and link both inboxes.
    pub async fn create_direct_channel(
        &self,
        owner: &AccountId,
        peer: &AccountId,
    ) -> Result<ChannelId, ChatError> {
        if owner == peer {
            return Err(ChatError::BadRequest(format!(
                "{} cannot open a direct channel with itself",
                owner
            )));
        }
        self.accounts.account_partition(owner).await?;
        self.accounts.account_partition(peer).await?;

        let channel = self
            .channels
            .create_channel(ChannelKind::Dm, owner, std::slice::from_ref(peer))
            .await?;
        self.participants.link(owner, &channel).await?;
        self.participants.link(peer, &channel).await?;
        Ok(channel)
    }

    pub async fn link(&self, channel: &ChannelId, account: &AccountId) -> Result<i64, ChatError> {
        self.require_member(channel, account).await?;
        self.participants.link(account, channel).await
    }

    pub async fn unlink(&self, channel: &ChannelId, account: &AccountId) -> Result<(), ChatError> {
        self.require_member(channel, account).await?;
        self.participants.unlink(account, channel).await
    }

    pub async fn mark_read(
        &self,
        channel: &ChannelId,
        account: &AccountId,
        through: i64,
    ) -> Result<bool, ChatError> {
        self.require_member(channel, account).await?;
        self.participants.mark_read(account, channel, through).await
    }

    /// Queue a fan-out for a message stored by someone else.
    pub async fn enqueue_send_message(
        &self,
        uuid: &str,
        channel: ChannelId,
    ) -> Result<i64, ChatError> {
        if uuid.trim().is_empty() {
            return Err(ChatError::BadRequest("idempotency key is empty".into()));
        }
        self.queue.push(&WorkEvent::send_message(uuid, channel)).await
    }

    /// A dispatcher bound to this process's queue and services.
    pub fn dispatcher(&self, signature: impl Into<String>) -> FanoutDispatcher {
        let handler = SendMessageHandler::new(
            self.messages.clone(),
            self.participants.clone(),
            self.channels.clone(),
            self.settings.retry.clone(),
        );
        FanoutDispatcher::new(
            self.queue.clone(),
            signature,
            Arc::new(handler),
            self.settings.poll_timeout,
        )
    }

    async fn require_member(&self, channel: &ChannelId, account: &AccountId) -> Result<(), ChatError> {
        let members = self.channels.channel_members(channel).await?;
        if !members.contains(account) {
            debug!("{} is not a member of {}", account, channel);
            return Err(ChatError::NotAllowed(format!(
                "{} is not a member of {}",
                account, channel
            )));
        }
        Ok(())
    }
}
