use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use chatchan_types::events::{SendMessageEvent, WorkEvent};
use chatchan_types::{AccountId, Message};

use crate::ChatError;
use crate::directory::ChannelDirectory;
use crate::messages::MessageService;
use crate::participants::ParticipantService;
use crate::queue::{QueueEvent, WorkQueue};
use crate::retry::RetryPolicy;

/// Processes one kind of work event. Handlers must be idempotent: the queue
/// delivers at least once.
#[async_trait]
pub trait EventHandler<E: Sync>: Send + Sync {
    async fn handle(&self, event: &E) -> Result<(), ChatError>;
}

/// Fans a stored message out to the inbox of every other channel member.
pub struct SendMessageHandler {
    messages: MessageService,
    participants: ParticipantService,
    channels: Arc<dyn ChannelDirectory>,
    retry: RetryPolicy,
}

impl SendMessageHandler {
    pub fn new(
        messages: MessageService,
        participants: ParticipantService,
        channels: Arc<dyn ChannelDirectory>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            messages,
            participants,
            channels,
            retry,
        }
    }

    async fn update_member(&self, member: &AccountId, message: &Message) -> Result<(), ChatError> {
        self.retry
            .run("participant fan-out", |_| async move {
                if self
                    .participants
                    .apply_new_message(member, &message.channel_id, message)
                    .await?
                {
                    Ok(())
                } else {
                    Err(ChatError::RaceCondition(format!(
                        "participant {} in {} changed underneath",
                        member, message.channel_id
                    )))
                }
            })
            .await
    }
}

#[async_trait]
impl EventHandler<SendMessageEvent> for SendMessageHandler {
    async fn handle(&self, event: &SendMessageEvent) -> Result<(), ChatError> {
        let message = self.messages.get(&event.channel_id, &event.uuid).await?;
        let members = self.channels.channel_members(&event.channel_id).await?;

        let recipients: Vec<&AccountId> =
            members.iter().filter(|m| **m != message.sender).collect();
        let results = join_all(
            recipients
                .iter()
                .map(|member| self.update_member(member, &message)),
        )
        .await;

        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        debug!(
            "Fanned out message {} (ordinal {}) to {} members",
            message.uuid,
            message.ordinal,
            recipients.len()
        );
        Ok(())
    }
}

/// What one turn of the dispatcher loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing was eligible.
    Idle,
    /// An event was handled, or dropped as terminal, and deleted.
    Acknowledged,
    /// The handler failed transiently; the event waits for redelivery.
    Deferred,
}

pub struct FanoutDispatcher {
    queue: WorkQueue,
    signature: String,
    send_message: Arc<dyn EventHandler<SendMessageEvent>>,
    poll_timeout: Duration,
}

impl FanoutDispatcher {
    pub fn new(
        queue: WorkQueue,
        signature: impl Into<String>,
        send_message: Arc<dyn EventHandler<SendMessageEvent>>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            signature: signature.into(),
            send_message,
            poll_timeout,
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Pop and handle at most one event.
    pub async fn process_next(&self) -> Result<Dispatch, ChatError> {
        let Some(event) = self.queue.pop().await? else {
            return Ok(Dispatch::Idle);
        };

        let result = match event.decode() {
            Ok(WorkEvent::SendMessage(send)) => self.send_message.handle(&send).await,
            Ok(WorkEvent::Ignore) => Ok(()),
            Err(e) => Err(ChatError::BadRequest(format!(
                "undecodable payload for event {}: {}",
                event.id, e
            ))),
        };

        self.settle(&event, result).await
    }

    async fn settle(
        &self,
        event: &QueueEvent,
        result: Result<(), ChatError>,
    ) -> Result<Dispatch, ChatError> {
        match result {
            Ok(()) => {}
            Err(e) if e.is_terminal() => {
                error!("Dropping event {}: {}", event.id, e);
            }
            Err(e) => {
                warn!("Event {} left for redelivery: {}", event.id, e);
                return Ok(Dispatch::Deferred);
            }
        }
        self.queue.acknowledge(event).await?;
        Ok(Dispatch::Acknowledged)
    }

    /// Run until `shutdown` turns true or its sender goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Dispatcher {} started", self.signature);

        while !*shutdown.borrow() {
            // Register before popping so a push landing in between still
            // wakes this loop.
            let activity = self.queue.wait_for_activity(&self.signature);

            let pause = match self.process_next().await {
                Ok(Dispatch::Idle) => Some(activity),
                Ok(_) => continue,
                Err(e) => {
                    error!("Dispatcher {} failed to process the queue: {}", self.signature, e);
                    None
                }
            };

            tokio::select! {
                _ = async {
                    match pause {
                        Some(activity) => activity.wait().await,
                        None => std::future::pending().await,
                    }
                } => {}
                _ = tokio::time::sleep(self.poll_timeout) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Dispatcher {} stopped", self.signature);
    }
}
