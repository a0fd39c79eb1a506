//! Remote log abstraction and bundled backends.
//!
//! A remote log is an append-only, order-queryable collection of
//! [`EventRecord`]s that can report changes live:
//! - `append` stores a record and returns its store-assigned key
//! - `query_last` runs a one-shot ordered range query
//! - `subscribe_from` opens a [`DeltaStream`] starting at a [`Cursor`]
//!
//! Two backends ship with the crate:
//! - [`MemoryLog`]: in-process, with a connectivity switch
//! - [`FileLog`]: durable, one append-only file per collection
//!
//! # Example
//!
//! ```ignore
//! let log = MemoryLog::new();
//! let mut feed = log.subscribe_from("events", Cursor::Beginning).await?;
//!
//! log.append("events", &EventRecord::new("order.placed", payload)).await?;
//!
//! while let Some(delta) = feed.next().await {
//!     println!("{:?} {:?}", delta.kind, delta.key);
//! }
//! ```

mod feeds;
mod file;
mod memory;

pub use feeds::{DeltaStream, FeedHub, FeedId};
pub use file::{FileLog, FileLogConfig};
pub use memory::MemoryLog;

use crate::error::Result;
use crate::types::{Cursor, EventKey, EventRecord, OrderBy};
use async_trait::async_trait;

/// An append-only, remotely synchronized, ordered record collection.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    /// Whether appends and queries can currently reach the log.
    fn is_connected(&self) -> bool;

    /// Append a record and return its assigned key.
    ///
    /// Fails with `NotConnected` while disconnected.
    async fn append(&self, collection: &str, record: &EventRecord) -> Result<EventKey>;

    /// Return the last `limit` records in ascending `order`.
    async fn query_last(
        &self,
        collection: &str,
        limit: usize,
        order: OrderBy,
    ) -> Result<Vec<(EventKey, EventRecord)>>;

    /// Open a live feed.
    ///
    /// Existing records admitted by `cursor` are reported first as inserts in
    /// ascending `(created_at, key)` order, then live changes follow.
    async fn subscribe_from(&self, collection: &str, cursor: Cursor) -> Result<DeltaStream>;

    /// Close a live feed.
    async fn close(&self, mut stream: DeltaStream) {
        stream.close();
    }
}

/// Sort query results by the requested order key.
pub(crate) fn sort_records(records: &mut [(EventKey, EventRecord)], order: OrderBy) {
    match order {
        OrderBy::CreatedAt => {
            records.sort_by(|a, b| (a.1.created_at, &a.0).cmp(&(b.1.created_at, &b.0)))
        }
        OrderBy::Key => records.sort_by(|a, b| a.0.cmp(&b.0)),
    }
}

/// Keep only the last `limit` entries of an already sorted list.
pub(crate) fn take_last(
    mut records: Vec<(EventKey, EventRecord)>,
    limit: usize,
) -> Vec<(EventKey, EventRecord)> {
    if records.len() > limit {
        records.drain(..records.len() - limit);
    }
    records
}

/// Collect the records a new feed must replay, in delivery order.
pub(crate) fn backlog<'a>(
    records: impl Iterator<Item = (&'a EventKey, &'a EventRecord)>,
    cursor: Cursor,
) -> Vec<(EventKey, EventRecord)> {
    let mut admitted: Vec<_> = records
        .filter(|(_, record)| cursor.admits(record))
        .map(|(key, record)| (key.clone(), record.clone()))
        .collect();
    sort_records(&mut admitted, OrderBy::CreatedAt);
    admitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;

    fn entry(seq: u64, created_at: i64) -> (EventKey, EventRecord) {
        (
            EventKey::from_sequence(seq),
            EventRecord::at("t", created_at, Payload::new()),
        )
    }

    #[test]
    fn test_sort_by_created_at_then_key() {
        let mut records = vec![entry(3, 20), entry(1, 30), entry(2, 20)];
        sort_records(&mut records, OrderBy::CreatedAt);

        let keys: Vec<_> = records.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            keys,
            vec![
                EventKey::from_sequence(2),
                EventKey::from_sequence(3),
                EventKey::from_sequence(1)
            ]
        );
    }

    #[test]
    fn test_take_last() {
        let records = vec![entry(1, 10), entry(2, 20), entry(3, 30)];
        let last = take_last(records, 1);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].1.created_at, 30);

        assert_eq!(take_last(vec![entry(1, 10)], 5).len(), 1);
    }
}
