//! Hub configuration.

use crate::catchup::StartMode;
use crate::error::Result;
use crate::publisher::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default log collection name.
pub const DEFAULT_COLLECTION: &str = "events";

/// Default number of fire retries.
pub const DEFAULT_RETRIES: u32 = 3;

/// Configuration for an [`EventHub`](crate::EventHub).
///
/// Backend connection parameters belong to the backend (see
/// [`FileLogConfig`](crate::remote::FileLogConfig)).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventsConfig {
    /// Collection in the remote log holding the events.
    /// Default: "events"
    pub collection: String,

    /// Skip history when the live feed starts.
    /// Default: true
    pub start_from_last: bool,

    /// Retries for `fire` while the log is unreachable.
    /// Default: 3
    pub fire_retries: u32,

    /// Delay between fire retries, in milliseconds.
    /// Default: 100
    pub retry_delay_ms: u64,

    /// Buffer size for channel listeners.
    /// Default: 1000
    pub listener_buffer: usize,
}

impl EventsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_start_from_last(mut self, start_from_last: bool) -> Self {
        self.start_from_last = start_from_last;
        self
    }

    pub fn with_fire_retries(mut self, retries: u32) -> Self {
        self.fire_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_listener_buffer(mut self, size: usize) -> Self {
        self.listener_buffer = size;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.fire_retries, self.retry_delay())
    }

    pub fn start_mode(&self) -> StartMode {
        StartMode::from_flag(self.start_from_last)
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            start_from_last: true,
            fire_retries: DEFAULT_RETRIES,
            retry_delay_ms: 100,
            listener_buffer: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventsConfig::default();
        assert_eq!(config.collection, "events");
        assert!(config.start_from_last);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.start_mode(), StartMode::FromLast);
    }

    #[test]
    fn test_builder() {
        let config = EventsConfig::new()
            .with_collection("audit")
            .with_start_from_last(false)
            .with_fire_retries(5)
            .with_retry_delay(Duration::from_millis(20));

        assert_eq!(config.collection, "audit");
        assert_eq!(config.start_mode(), StartMode::FromBeginning);
        assert_eq!(config.retry_policy().max_retries, 5);
        assert_eq!(config.retry_delay(), Duration::from_millis(20));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = EventsConfig::from_json_str(r#"{"collection": "jobs", "fireRetries": 1}"#)
            .unwrap();
        assert_eq!(config.collection, "jobs");
        assert_eq!(config.fire_retries, 1);
        assert!(config.start_from_last);
        assert_eq!(config.retry_delay_ms, 100);
    }
}
