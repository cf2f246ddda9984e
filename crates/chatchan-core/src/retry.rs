use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::ChatError;

type Backoff = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Bounded retry with a pluggable pause between attempts.
///
/// Attempts are numbered from 1. The backoff function receives the number of
/// the attempt that just failed.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Retry without pausing.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::with_backoff(max_attempts, |_| Duration::ZERO)
    }

    pub fn with_backoff(
        max_attempts: u32,
        backoff: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(backoff),
        }
    }

    /// Exponential backoff from `base`, capped at `cap`, with full jitter.
    pub fn jittered(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self::with_backoff(max_attempts, move |attempt| {
            let exp = attempt.saturating_sub(1).min(16);
            let ceiling = base.saturating_mul(1 << exp).min(cap);
            let ceiling_ms = ceiling.as_millis() as u64;
            if ceiling_ms == 0 {
                return ceiling;
            }
            Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }

    /// Sleep for the backoff that follows a failed `attempt`.
    pub async fn pause(&self, attempt: u32) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Exhaustion is reported as `ServiceUnavailable`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ChatError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ChatError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Err(e) if e.is_retryable() => {
                    if attempt >= self.max_attempts {
                        return Err(ChatError::ServiceUnavailable(format!(
                            "{} gave up after {} attempts: {}",
                            what, attempt, e
                        )));
                    }
                    debug!("{} attempt {} lost a race: {}", what, attempt, e);
                    self.pause(attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::jittered(5, Duration::from_millis(5), Duration::from_millis(100))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn exhaustion_surfaces_as_service_unavailable() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::immediate(3);

        let result: Result<(), _> = policy
            .run("test op", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ChatError::RaceCondition("version moved".into()))
            })
            .await;

        assert!(matches!(result, Err(ChatError::ServiceUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::immediate(5);

        let result: Result<(), _> = policy
            .run("test op", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ChatError::NotFound("gone".into()))
            })
            .await;

        assert!(matches!(result, Err(ChatError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let policy = RetryPolicy::immediate(5);
        let value = policy
            .run("test op", |attempt| async move {
                if attempt < 3 {
                    Err(ChatError::RaceCondition("again".into()))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn jitter_stays_under_the_cap() {
        let policy = RetryPolicy::jittered(10, Duration::from_millis(5), Duration::from_millis(40));
        for attempt in 1..=10 {
            assert!(policy.delay(attempt) <= Duration::from_millis(40));
        }
        assert_eq!(RetryPolicy::immediate(0).max_attempts(), 1);
    }
}
