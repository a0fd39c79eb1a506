//! Bridges a remote live feed into the local bus.

use crate::bus::LocalBus;
use crate::catchup::{CatchupResolver, StartMode};
use crate::error::{EventsError, Result};
use crate::remote::{DeltaStream, RemoteLog};
use crate::types::{Delta, EventObject};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle of a reconciler. `Detached` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcilerState {
    /// No live feed.
    Idle,
    /// Cursor being resolved.
    Initializing,
    /// Feed open, deltas flowing.
    Attached,
    /// Feed closed.
    Detached,
}

/// Counters for reconciled deltas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    /// Deltas turned into events and delivered.
    pub delivered: u64,
    /// Deltas dropped for lacking a type or key.
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    discarded: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ReconcilerStats {
        ReconcilerStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

struct Pump {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Turns deltas from one live feed into bus deliveries.
///
/// One instance covers one feed lifetime; once detached, build a new one to
/// resubscribe.
pub struct Reconciler {
    log: Arc<dyn RemoteLog>,
    bus: Arc<LocalBus>,
    collection: String,
    mode: StartMode,
    state: RwLock<ReconcilerState>,
    counters: Arc<Counters>,
    pump: Option<Pump>,
}

impl Reconciler {
    pub fn new(
        log: Arc<dyn RemoteLog>,
        bus: Arc<LocalBus>,
        collection: impl Into<String>,
        mode: StartMode,
    ) -> Self {
        Self {
            log,
            bus,
            collection: collection.into(),
            mode,
            state: RwLock::new(ReconcilerState::Idle),
            counters: Arc::new(Counters::default()),
            pump: None,
        }
    }

    pub fn state(&self) -> ReconcilerState {
        *self.state.read()
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.counters.snapshot()
    }

    fn set_state(&self, state: ReconcilerState) {
        debug!(collection = %self.collection, ?state, "reconciler state");
        *self.state.write() = state;
    }

    /// Resolve the cursor, open the feed and start pumping deltas.
    ///
    /// Must be called inside a tokio runtime. On failure the reconciler is
    /// left `Detached` and the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        let current = self.state();
        if current != ReconcilerState::Idle {
            return Err(EventsError::InvalidStateTransition {
                from: format!("{:?}", current),
                to: format!("{:?}", ReconcilerState::Initializing),
            });
        }
        self.set_state(ReconcilerState::Initializing);

        let stream = match self.open_feed().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "live feed setup failed");
                self.set_state(ReconcilerState::Detached);
                return Err(e);
            }
        };

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(pump(
            stream,
            self.bus.clone(),
            self.counters.clone(),
            stopped,
        ));
        self.pump = Some(Pump { stop, task });
        self.set_state(ReconcilerState::Attached);
        Ok(())
    }

    async fn open_feed(&self) -> Result<DeltaStream> {
        let cursor = CatchupResolver::new(self.log.clone(), self.collection.clone())
            .resolve_cursor(self.mode)
            .await?;
        self.log.subscribe_from(&self.collection, cursor).await
    }

    /// Close the feed and stop delivering. No-op once detached.
    pub async fn detach(&mut self) -> Result<()> {
        if let Some(Pump { stop, task }) = self.pump.take() {
            let _ = stop.send(());
            if let Err(e) = task.await {
                warn!(collection = %self.collection, error = %e, "delta pump ended abnormally");
            }
        }
        if self.state() != ReconcilerState::Detached {
            self.set_state(ReconcilerState::Detached);
        }
        Ok(())
    }

    /// Map one delta to an event and deliver it under its record type.
    ///
    /// Returns false if the delta was discarded.
    pub fn reconcile(bus: &LocalBus, delta: Delta) -> bool {
        match to_event(delta) {
            Some(event) => {
                bus.deliver(&event.event_type, &event);
                true
            }
            None => false,
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            let _ = pump.stop.send(());
        }
    }
}

/// Build the local event for a delta; `None` if the record has no type or
/// no key.
fn to_event(delta: Delta) -> Option<EventObject> {
    let Delta { kind, key, record } = delta;

    let Some(key) = key.filter(|k| !k.is_empty()) else {
        debug!(?kind, "discarding delta without key");
        return None;
    };
    let Some(event_type) = record.event_type.filter(|t| !t.is_empty()) else {
        debug!(?kind, %key, "discarding delta without type");
        return None;
    };

    Some(EventObject {
        key,
        event_type,
        created_at: record.created_at,
        data: record.data,
        action: kind.action(),
    })
}

async fn pump(
    mut stream: DeltaStream,
    bus: Arc<LocalBus>,
    counters: Arc<Counters>,
    mut stopped: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stopped => break,
            delta = stream.recv() => match delta {
                Ok(delta) => {
                    if Reconciler::reconcile(&bus, delta) {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    } else {
                        counters.discarded.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    debug!(feed = stream.id().0, error = %e, "live feed ended");
                    break;
                }
            },
        }
    }
    stream.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryLog;
    use crate::types::{DeltaKind, EventAction, EventKey, EventRecord, Payload};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    fn record(event_type: &str, created_at: i64) -> EventRecord {
        let mut data = Payload::new();
        data.insert("at".into(), json!(created_at));
        EventRecord::at(event_type, created_at, data)
    }

    fn collect(bus: &Arc<LocalBus>, event_type: &str) -> Arc<Mutex<Vec<EventObject>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on(event_type, move |e| sink.lock().push(e.clone()));
        seen
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn test_to_event_maps_actions() {
        for (kind, action) in [
            (DeltaKind::Insert, EventAction::Created),
            (DeltaKind::Update, EventAction::Updated),
            (DeltaKind::Delete, EventAction::Deleted),
        ] {
            let event = to_event(Delta::new(kind, EventKey::from("k1"), record("a", 7))).unwrap();
            assert_eq!(event.action, action);
            assert_eq!(event.key, EventKey::from("k1"));
            assert_eq!(event.created_at, 7);
            assert_eq!(event.data["at"], 7);
        }
    }

    #[test]
    fn test_to_event_discards_malformed() {
        let mut untyped = record("a", 1);
        untyped.event_type = None;
        assert!(to_event(Delta::new(DeltaKind::Insert, EventKey::from("k"), untyped)).is_none());

        let empty_type = record("", 1);
        assert!(to_event(Delta::new(DeltaKind::Insert, EventKey::from("k"), empty_type)).is_none());

        let keyless = Delta {
            kind: DeltaKind::Insert,
            key: None,
            record: record("a", 1),
        };
        assert!(to_event(keyless).is_none());

        let empty_key = Delta::new(DeltaKind::Insert, EventKey::from(""), record("a", 1));
        assert!(to_event(empty_key).is_none());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let log = Arc::new(MemoryLog::new());
        let bus = LocalBus::new();
        let mut reconciler = Reconciler::new(log.clone(), bus, "events", StartMode::FromLast);
        assert_eq!(reconciler.state(), ReconcilerState::Idle);

        reconciler.start().await.unwrap();
        assert_eq!(reconciler.state(), ReconcilerState::Attached);
        assert_eq!(log.feed_count(), 1);

        let again = reconciler.start().await;
        assert!(matches!(again, Err(EventsError::InvalidStateTransition { .. })));

        reconciler.detach().await.unwrap();
        assert_eq!(reconciler.state(), ReconcilerState::Detached);
        assert_eq!(log.feed_count(), 0);

        reconciler.detach().await.unwrap();
        assert!(reconciler.start().await.is_err());
    }

    #[tokio::test]
    async fn test_cursor_failure_detaches() {
        let log = Arc::new(MemoryLog::disconnected());
        let mut reconciler =
            Reconciler::new(log.clone(), LocalBus::new(), "events", StartMode::FromLast);

        let result = reconciler.start().await;
        assert!(matches!(result, Err(EventsError::CursorResolution(_))));
        assert_eq!(reconciler.state(), ReconcilerState::Detached);
        assert_eq!(log.feed_count(), 0);
    }

    #[tokio::test]
    async fn test_delivers_by_record_type() {
        let log = Arc::new(MemoryLog::new());
        let bus = LocalBus::new();
        let orders = collect(&bus, "order.placed");
        let other = collect(&bus, "user.joined");

        let mut reconciler =
            Reconciler::new(log.clone(), bus.clone(), "events", StartMode::FromBeginning);
        reconciler.start().await.unwrap();

        log.append("events", &record("order.placed", 1)).await.unwrap();
        settle().await;

        assert_eq!(orders.lock().len(), 1);
        assert!(other.lock().is_empty());
        assert_eq!(reconciler.stats().delivered, 1);
        reconciler.detach().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_delta_counts_as_discarded() {
        let log = Arc::new(MemoryLog::new());
        let bus = LocalBus::new();
        let any = Arc::new(Mutex::new(0usize));
        let sink = any.clone();
        bus.on_any(move |_| *sink.lock() += 1);

        let mut reconciler =
            Reconciler::new(log.clone(), bus.clone(), "events", StartMode::FromBeginning);
        reconciler.start().await.unwrap();

        let mut untyped = record("x", 5);
        untyped.event_type = None;
        log.inject("events", Delta::new(DeltaKind::Insert, EventKey::from("k"), untyped));
        settle().await;

        assert_eq!(*any.lock(), 0);
        assert_eq!(reconciler.stats().discarded, 1);
        reconciler.detach().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_delivery_after_detach() {
        let log = Arc::new(MemoryLog::new());
        let bus = LocalBus::new();
        let seen = collect(&bus, "a");

        let mut reconciler =
            Reconciler::new(log.clone(), bus.clone(), "events", StartMode::FromBeginning);
        reconciler.start().await.unwrap();
        reconciler.detach().await.unwrap();

        log.append("events", &record("a", 1)).await.unwrap();
        settle().await;
        assert!(seen.lock().is_empty());
    }
}
