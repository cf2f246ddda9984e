//! Durable at-least-once work queue living in the core store.
//!
//! An event is handed out by bumping its `version`; until it is acknowledged
//! (deleted at that version) it stays in the table, and once its reservation
//! is older than the staleness window any worker may take it again.
//!
//! Pushes also wake one idle poller in this process through the waiter
//! registry, so dispatchers do not have to sit out a full poll interval.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error};

use chatchan_db::models::QueueRow;
use chatchan_db::{PartitionRouter, StoreError, from_millis, now_millis};
use chatchan_types::events::WorkEvent;

use crate::ChatError;
use crate::retry::RetryPolicy;

/// A reserved event. `version` is the reservation the holder owns.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub id: i64,
    pub version: i64,
    pub payload: String,
    pub reserved_at: DateTime<Utc>,
}

impl QueueEvent {
    pub fn decode(&self) -> Result<WorkEvent, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub staleness: Duration,
    pub retry: RetryPolicy,
}

/// Pending wake-up for one signature.
pub struct Activity {
    rx: watch::Receiver<bool>,
}

impl Activity {
    pub fn is_signalled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a push signals this waiter.
    pub async fn wait(mut self) {
        // A dropped sender counts as a wake-up so the caller polls again.
        if self.rx.wait_for(|fired| *fired).await.is_err() {
            debug!("Waiter dropped from the registry before it fired");
        }
    }

    /// Wait at most `timeout`. Returns whether a push arrived.
    pub async fn wait_timeout(self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

#[derive(Default)]
struct Waiters {
    pending: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl Waiters {
    fn register(&self, signature: &str) -> Activity {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = pending
            .entry(signature.to_string())
            .or_insert_with(|| watch::channel(false).0);
        Activity { rx: tx.subscribe() }
    }

    /// Fire one waiter that still has someone listening. Returns the
    /// signature that was woken.
    fn wake_one(&self) -> Option<String> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|_, tx| tx.receiver_count() > 0);

        let signature = pending.keys().next().cloned()?;
        if let Some(tx) = pending.remove(&signature) {
            tx.send_replace(true);
        }
        Some(signature)
    }

    fn len(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|_, tx| tx.receiver_count() > 0);
        pending.len()
    }
}

enum Claim {
    Empty,
    Lost,
    Reserved(QueueRow),
}

#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<WorkQueueInner>,
}

struct WorkQueueInner {
    router: Arc<PartitionRouter>,
    config: QueueConfig,
    waiters: Waiters,
}

impl WorkQueue {
    pub fn new(router: Arc<PartitionRouter>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(WorkQueueInner {
                router,
                config,
                waiters: Waiters::default(),
            }),
        }
    }

    /// Durably enqueue `event`, then wake one idle waiter.
    pub async fn push(&self, event: &WorkEvent) -> Result<i64, ChatError> {
        let payload = serde_json::to_string(event).map_err(StoreError::from)?;
        let core = self.inner.router.core()?;

        let id = core.run(move |db| db.enqueue(&payload, now_millis())).await?;
        debug!("Queued {} event {}", event.name(), id);

        if let Some(signature) = self.inner.waiters.wake_one() {
            debug!("Woke waiter {} for event {}", signature, id);
        }
        Ok(id)
    }

    /// Reserve the oldest event that is unreserved or whose reservation went
    /// stale. `None` when nothing is eligible, or when every attempt lost its
    /// reservation race.
    pub async fn pop(&self) -> Result<Option<QueueEvent>, ChatError> {
        let core = self.inner.router.core()?;
        let staleness = i64::try_from(self.inner.config.staleness.as_millis()).unwrap_or(i64::MAX);
        let retry = &self.inner.config.retry;

        for attempt in 1..=retry.max_attempts() {
            let claim = core
                .run(move |db| {
                    let now = now_millis();
                    let Some(mut row) = db.select_ready(now.saturating_sub(staleness))? else {
                        return Ok(Claim::Empty);
                    };
                    if db.reserve(row.id, row.version, now)? == 0 {
                        return Ok(Claim::Lost);
                    }
                    row.version += 1;
                    row.updated_at = now;
                    Ok(Claim::Reserved(row))
                })
                .await?;

            match claim {
                Claim::Empty => return Ok(None),
                Claim::Reserved(row) => {
                    debug!("Reserved event {} at version {}", row.id, row.version);
                    return Ok(Some(QueueEvent {
                        id: row.id,
                        version: row.version,
                        payload: row.payload,
                        reserved_at: from_millis(row.updated_at)?,
                    }));
                }
                Claim::Lost => {
                    debug!("Lost reservation race (attempt {})", attempt);
                    retry.pause(attempt).await;
                }
            }
        }
        Ok(None)
    }

    /// Delete a processed event. The reservation must still be ours.
    pub async fn acknowledge(&self, event: &QueueEvent) -> Result<(), ChatError> {
        let core = self.inner.router.core()?;
        let (id, version) = (event.id, event.version);

        let affected = core.run(move |db| db.delete_reserved(id, version)).await?;
        if affected == 0 {
            error!(
                "Acknowledge of event {} at version {} matched no row",
                id, version
            );
            return Err(ChatError::DataIntegrity(format!(
                "queue event {} is no longer reserved at version {}",
                id, version
            )));
        }
        debug!("Acknowledged event {}", id);
        Ok(())
    }

    /// Register interest in the next push under `signature`.
    ///
    /// The returned handle is unresolved at the time it is handed out. Callers
    /// sharing a signature share the wake-up.
    pub fn wait_for_activity(&self, signature: &str) -> Activity {
        self.inner.waiters.register(signature)
    }

    /// Number of signatures currently waiting.
    pub fn waiting(&self) -> usize {
        self.inner.waiters.len()
    }

    pub async fn depth(&self) -> Result<i64, ChatError> {
        let core = self.inner.router.core()?;
        Ok(core.run(|db| db.queue_depth()).await?)
    }
}

#[cfg(test)]
mod tests {
    use chatchan_db::{RandomPartitioner, StorageConfig};

    use super::*;

    fn queue(staleness: Duration) -> WorkQueue {
        let router = PartitionRouter::new(
            StorageConfig::all_in_one(chatchan_db::MEMORY_PATH, 1),
            RandomPartitioner,
        )
        .unwrap();
        WorkQueue::new(
            Arc::new(router),
            QueueConfig {
                staleness,
                retry: RetryPolicy::immediate(3),
            },
        )
    }

    #[tokio::test]
    async fn push_wakes_exactly_one_waiter() {
        let q = queue(Duration::from_secs(60));
        let a = q.wait_for_activity("a");
        let b = q.wait_for_activity("b");
        assert!(!a.is_signalled() && !b.is_signalled());

        q.push(&WorkEvent::Ignore).await.unwrap();
        assert_eq!(
            [a.is_signalled(), b.is_signalled()].iter().filter(|s| **s).count(),
            1
        );

        q.push(&WorkEvent::Ignore).await.unwrap();
        assert!(a.is_signalled() && b.is_signalled());
        assert_eq!(q.waiting(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiters_do_not_swallow_wakeups() {
        let q = queue(Duration::from_secs(60));
        drop(q.wait_for_activity("gone"));
        let live = q.wait_for_activity("live");

        q.push(&WorkEvent::Ignore).await.unwrap();
        assert!(live.is_signalled());
    }

    #[tokio::test]
    async fn dropping_the_queue_releases_its_waiters() {
        let q = queue(Duration::from_secs(60));
        let activity = q.wait_for_activity("orphan");
        drop(q);

        assert!(!activity.is_signalled());
        assert!(activity.wait_timeout(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn fresh_registration_after_wakeup_is_unresolved() {
        let q = queue(Duration::from_secs(60));
        let first = q.wait_for_activity("sig");
        q.push(&WorkEvent::Ignore).await.unwrap();
        assert!(first.is_signalled());

        let second = q.wait_for_activity("sig");
        assert!(!second.is_signalled());
        assert!(!second.wait_timeout(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn acknowledge_requires_current_reservation() {
        let q = queue(Duration::from_secs(60));
        q.push(&WorkEvent::Ignore).await.unwrap();

        let event = q.pop().await.unwrap().unwrap();
        assert_eq!(event.version, 1);
        assert_eq!(event.decode().unwrap(), WorkEvent::Ignore);
        assert!(q.pop().await.unwrap().is_none());

        let stale = QueueEvent { version: 0, ..event.clone() };
        assert!(matches!(
            q.acknowledge(&stale).await,
            Err(ChatError::DataIntegrity(_))
        ));

        q.acknowledge(&event).await.unwrap();
        assert_eq!(q.depth().await.unwrap(), 0);
        assert!(matches!(
            q.acknowledge(&event).await,
            Err(ChatError::DataIntegrity(_))
        ));
    }
}
