//! Starting cursor for new live feeds.

use crate::error::{EventsError, Result};
use crate::remote::RemoteLog;
use crate::types::{Cursor, OrderBy};
use std::sync::Arc;
use tracing::debug;

/// Where a new live feed begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartMode {
    /// Replay every record in the log.
    FromBeginning,
    /// Skip history; report only records newer than the latest one.
    FromLast,
}

impl StartMode {
    pub fn from_flag(start_from_last: bool) -> Self {
        if start_from_last {
            StartMode::FromLast
        } else {
            StartMode::FromBeginning
        }
    }
}

/// Computes the cursor a reconnecting client subscribes from.
///
/// `FromLast` is strictly-greater-than on `created_at`: a record sharing the
/// exact millisecond of the latest one at setup time is not reported.
pub struct CatchupResolver {
    log: Arc<dyn RemoteLog>,
    collection: String,
}

impl CatchupResolver {
    pub fn new(log: Arc<dyn RemoteLog>, collection: impl Into<String>) -> Self {
        Self {
            log,
            collection: collection.into(),
        }
    }

    pub async fn resolve_cursor(&self, mode: StartMode) -> Result<Cursor> {
        if mode == StartMode::FromBeginning {
            return Ok(Cursor::Beginning);
        }

        let last = self
            .log
            .query_last(&self.collection, 1, OrderBy::CreatedAt)
            .await
            .map_err(|e| EventsError::CursorResolution(e.to_string()))?;

        let cursor = match last.last() {
            Some((_, record)) => Cursor::After(record.created_at),
            None => Cursor::Beginning,
        };
        debug!(collection = %self.collection, ?cursor, "resolved catch-up cursor");
        Ok(cursor)
    }
}
