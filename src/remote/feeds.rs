//! Live feed registry shared by the log backends.

use crate::error::{EventsError, Result};
use crate::types::{Cursor, Delta, DeltaKind, EventKey, EventRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Unique identifier for a live feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeedId(pub u64);

/// Internal feed state.
struct Feed {
    collection: String,
    cursor: Cursor,
    sender: UnboundedSender<Delta>,
}

impl Feed {
    /// Returns false if the receiving side is gone.
    fn try_send(&self, delta: Delta) -> bool {
        self.sender.send(delta).is_ok()
    }

    fn matches(&self, collection: &str, record: &EventRecord) -> bool {
        self.collection == collection && self.cursor.admits(record)
    }
}

/// Tracks open feeds and broadcasts deltas to them.
pub struct FeedHub {
    feeds: RwLock<HashMap<FeedId, Feed>>,
    next_id: AtomicU64,
}

impl FeedHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            feeds: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a feed and queue its backlog as inserts.
    ///
    /// Callers must hold their collection lock across computing `backlog` and
    /// this call, so no live delta can slip in between.
    pub fn open(
        self: &Arc<Self>,
        collection: &str,
        cursor: Cursor,
        backlog: Vec<(EventKey, EventRecord)>,
    ) -> DeltaStream {
        let id = FeedId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = unbounded_channel();

        for (key, record) in backlog {
            // Receiver is alive; it is still on this stack frame.
            let _ = sender.send(Delta::new(DeltaKind::Insert, key, record));
        }

        self.feeds.write().insert(
            id,
            Feed {
                collection: collection.to_string(),
                cursor,
                sender,
            },
        );
        debug!(feed = id.0, collection, ?cursor, "feed opened");

        DeltaStream {
            id,
            receiver,
            hub: Arc::downgrade(self),
            closed: false,
        }
    }

    /// Unregister a feed. Safe to call for unknown ids.
    pub fn close(&self, id: FeedId) {
        if self.feeds.write().remove(&id).is_some() {
            debug!(feed = id.0, "feed closed");
        }
    }

    /// Number of open feeds.
    pub fn feed_count(&self) -> usize {
        self.feeds.read().len()
    }

    /// Send a delta to every feed on `collection` whose cursor admits the record.
    /// Feeds whose receiver has gone away are removed.
    pub fn broadcast(&self, collection: &str, delta: Delta) {
        let mut to_remove = Vec::new();

        {
            let feeds = self.feeds.read();
            for (id, feed) in feeds.iter() {
                if feed.matches(collection, &delta.record) && !feed.try_send(delta.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut feeds = self.feeds.write();
            for id in to_remove {
                feeds.remove(&id);
            }
        }
    }
}

/// A lazy, unbounded, non-restartable sequence of deltas from one feed.
///
/// Once closed, `next` returns `None` forever. Dropping the stream closes it.
pub struct DeltaStream {
    id: FeedId,
    receiver: UnboundedReceiver<Delta>,
    hub: Weak<FeedHub>,
    closed: bool,
}

impl DeltaStream {
    pub fn id(&self) -> FeedId {
        self.id
    }

    /// Wait for the next delta.
    pub async fn next(&mut self) -> Option<Delta> {
        if self.closed {
            return None;
        }
        self.receiver.recv().await
    }

    /// Wait for the next delta, failing with `FeedClosed` once the feed has
    /// been closed or its log has gone away.
    pub async fn recv(&mut self) -> Result<Delta> {
        self.next().await.ok_or(EventsError::FeedClosed)
    }

    /// Take a delta if one is already queued.
    pub fn try_next(&mut self) -> Option<Delta> {
        if self.closed {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop the feed and unregister it from its log. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.receiver.close();
        if let Some(hub) = self.hub.upgrade() {
            hub.close(self.id);
        }
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        self.close();
    }
}
