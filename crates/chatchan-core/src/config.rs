use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tunables for the write path. The server binary fills these from the
/// environment; tests usually start from `Default` and shorten the timers.
#[derive(Debug, Clone)]
pub struct Settings {
    /// How long a reserved queue event stays invisible before it is handed
    /// out again.
    pub queue_staleness: Duration,
    /// Upper bound on how long an idle dispatcher sleeps between polls.
    pub poll_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_body_chars: usize,
    pub max_list_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue_staleness: Duration::from_secs(300),
            poll_timeout: Duration::from_millis(5000),
            retry: RetryPolicy::default(),
            max_body_chars: 4096,
            max_list_limit: 150,
        }
    }
}
