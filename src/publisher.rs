//! Appends locally fired events to the remote log.

use crate::error::{EventsError, Result};
use crate::remote::RemoteLog;
use crate::types::{EventKey, EventRecord, Payload};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed-delay retry policy for appends while the log is unreachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Fail on the first connectivity error.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// Turns `fire` requests into log appends.
#[derive(Clone)]
pub struct Publisher {
    log: Arc<dyn RemoteLog>,
    collection: String,
    policy: RetryPolicy,
}

impl Publisher {
    pub fn new(log: Arc<dyn RemoteLog>, collection: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            log,
            collection: collection.into(),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Append `{type, createdAt: now, data}` to the log.
    ///
    /// While the log is unreachable the append is retried every
    /// `policy.delay`; once more than `policy.max_retries` retries have been
    /// scheduled the call fails with [`EventsError::Connectivity`]. Other
    /// append errors are returned as-is.
    pub async fn fire(&self, event_type: &str, data: Payload) -> Result<()> {
        self.fire_keyed(event_type, data).await.map(|_| ())
    }

    /// Like [`fire`](Self::fire), returning the key the log assigned.
    pub async fn fire_keyed(&self, event_type: &str, data: Payload) -> Result<EventKey> {
        let mut attempt: u32 = 0;

        loop {
            if self.log.is_connected() {
                let record = EventRecord::new(event_type, data.clone());
                match self.log.append(&self.collection, &record).await {
                    Ok(key) => {
                        debug!(event_type, %key, attempt, "event appended");
                        return Ok(key);
                    }
                    Err(e) if e.is_retryable() => {
                        debug!(event_type, attempt, error = %e, "append lost connection");
                    }
                    Err(e) => return Err(e),
                }
            }

            if attempt > self.policy.max_retries {
                warn!(event_type, attempts = attempt, "giving up on unreachable log");
                return Err(EventsError::Connectivity { attempts: attempt });
            }

            warn!(
                event_type,
                attempt,
                delay_ms = self.policy.delay.as_millis() as u64,
                "log unreachable; retrying"
            );
            tokio::time::sleep(self.policy.delay).await;
            attempt += 1;
        }
    }
}
