//! In-process remote log.

use super::{backlog, sort_records, take_last, DeltaStream, FeedHub, RemoteLog};
use crate::error::{EventsError, Result};
use crate::types::{Cursor, Delta, DeltaKind, EventKey, EventRecord, OrderBy};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Collection {
    next_seq: u64,
    records: BTreeMap<EventKey, EventRecord>,
}

/// In-memory remote log.
///
/// Useful for tests and for relaying events between components of one
/// process. `set_connected(false)` makes appends and queries fail with
/// `NotConnected`; opening feeds is a local registration and keeps working.
pub struct MemoryLog {
    connected: AtomicBool,
    collections: Mutex<HashMap<String, Collection>>,
    feeds: Arc<FeedHub>,
}

impl MemoryLog {
    /// Create a connected, empty log.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            collections: Mutex::new(HashMap::new()),
            feeds: FeedHub::new(),
        }
    }

    /// Create an empty log that starts disconnected.
    pub fn disconnected() -> Self {
        let log = Self::new();
        log.set_connected(false);
        log
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Replace the record under `key`, reporting an update (or an insert if
    /// the key was unknown).
    pub fn update(&self, collection: &str, key: &EventKey, record: EventRecord) -> Result<()> {
        self.check_connected()?;
        let mut collections = self.collections.lock();
        let coll = collections.entry(collection.to_string()).or_default();

        let kind = match coll.records.insert(key.clone(), record.clone()) {
            Some(_) => DeltaKind::Update,
            None => DeltaKind::Insert,
        };
        self.feeds
            .broadcast(collection, Delta::new(kind, key.clone(), record));
        Ok(())
    }

    /// Remove the record under `key`, reporting a delete with its last value.
    pub fn remove(&self, collection: &str, key: &EventKey) -> Result<Option<EventRecord>> {
        self.check_connected()?;
        let mut collections = self.collections.lock();
        let removed = collections
            .get_mut(collection)
            .and_then(|coll| coll.records.remove(key));

        if let Some(ref record) = removed {
            self.feeds.broadcast(
                collection,
                Delta::new(DeltaKind::Delete, key.clone(), record.clone()),
            );
        }
        Ok(removed)
    }

    /// Push a raw delta to open feeds without storing anything.
    ///
    /// Simulates whatever the remote side may send, including malformed
    /// changes.
    pub fn inject(&self, collection: &str, delta: Delta) {
        let _guard = self.collections.lock();
        self.feeds.broadcast(collection, delta);
    }

    /// Number of records in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map(|coll| coll.records.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Number of open live feeds.
    pub fn feed_count(&self) -> usize {
        self.feeds.feed_count()
    }

    fn check_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(EventsError::NotConnected)
        }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteLog for MemoryLog {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn append(&self, collection: &str, record: &EventRecord) -> Result<EventKey> {
        self.check_connected()?;
        let mut collections = self.collections.lock();
        let coll = collections.entry(collection.to_string()).or_default();

        coll.next_seq += 1;
        let key = EventKey::from_sequence(coll.next_seq);
        coll.records.insert(key.clone(), record.clone());

        self.feeds.broadcast(
            collection,
            Delta::new(DeltaKind::Insert, key.clone(), record.clone()),
        );
        Ok(key)
    }

    async fn query_last(
        &self,
        collection: &str,
        limit: usize,
        order: OrderBy,
    ) -> Result<Vec<(EventKey, EventRecord)>> {
        self.check_connected()?;
        let collections = self.collections.lock();
        let mut records: Vec<_> = collections
            .get(collection)
            .map(|coll| {
                coll.records
                    .iter()
                    .map(|(k, r)| (k.clone(), r.clone()))
                    .collect()
            })
            .unwrap_or_default();

        sort_records(&mut records, order);
        Ok(take_last(records, limit))
    }

    async fn subscribe_from(&self, collection: &str, cursor: Cursor) -> Result<DeltaStream> {
        let collections = self.collections.lock();
        let replay = collections
            .get(collection)
            .map(|coll| backlog(coll.records.iter(), cursor))
            .unwrap_or_default();

        Ok(self.feeds.open(collection, cursor, replay))
    }
}
