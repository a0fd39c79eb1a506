//! Core types shared by the log backends, the bus and the reconciler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Event payload as stored remotely and delivered locally.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Opaque record identifier assigned by the log on append.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey(pub String);

impl EventKey {
    /// Build a key from a per-collection counter.
    ///
    /// Zero-padded so that lexical order matches insertion order.
    pub fn from_sequence(seq: u64) -> Self {
        EventKey(format!("{:016x}", seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventKey({})", self.0)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventKey {
    fn from(s: &str) -> Self {
        EventKey(s.to_string())
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A record as stored in the remote log.
///
/// `event_type` is optional because records arriving from the log are
/// untrusted; the reconciler drops records without one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Epoch milliseconds, set by the producer.
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,

    #[serde(default)]
    pub data: Payload,
}

impl EventRecord {
    /// Create a record stamped with the current time.
    pub fn new(event_type: impl Into<String>, data: Payload) -> Self {
        Self::at(event_type, now_millis(), data)
    }

    /// Create a record with an explicit timestamp.
    pub fn at(event_type: impl Into<String>, created_at: i64, data: Payload) -> Self {
        Self {
            event_type: Some(event_type.into()),
            created_at,
            data,
        }
    }

    /// Parse a record from its JSON wire form.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// What happened to the record that produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
}

/// An event as delivered to local listeners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventObject {
    pub key: EventKey,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    pub data: Payload,
    pub action: EventAction,
}

/// Kind of change reported by a live feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Insert,
    Update,
    Delete,
}

impl DeltaKind {
    pub fn action(self) -> EventAction {
        match self {
            DeltaKind::Insert => EventAction::Created,
            DeltaKind::Update => EventAction::Updated,
            DeltaKind::Delete => EventAction::Deleted,
        }
    }
}

/// One change notification from a live feed.
///
/// For deletes, `record` carries the last value before removal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub kind: DeltaKind,
    pub key: Option<EventKey>,
    pub record: EventRecord,
}

impl Delta {
    pub fn new(kind: DeltaKind, key: EventKey, record: EventRecord) -> Self {
        Self {
            kind,
            key: Some(key),
            record,
        }
    }
}

/// Position in the log's `created_at` order from which a feed reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cursor {
    /// Every record.
    Beginning,
    /// Records with `created_at` strictly greater than the value.
    After(i64),
}

impl Cursor {
    pub fn admits(&self, record: &EventRecord) -> bool {
        match self {
            Cursor::Beginning => true,
            Cursor::After(ts) => record.created_at > *ts,
        }
    }
}

/// Order key for one-shot range queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    CreatedAt,
    Key,
}
