//! Error handling and edge case tests.

use eventrelay::{
    Delta, DeltaKind, EventHub, EventKey, EventObject, EventRecord, EventsConfig, EventsError,
    FileLog, FileLogConfig, MemoryLog, Payload, ReconcilerState, RemoteLog,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::{timeout, Instant};

fn untyped(created_at: i64) -> EventRecord {
    EventRecord {
        event_type: None,
        created_at,
        data: Payload::new(),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// --- Connectivity ---

#[tokio::test(start_paused = true)]
async fn test_fire_fails_after_exhausting_retries() {
    let log = Arc::new(MemoryLog::disconnected());
    let config = EventsConfig::default().with_start_from_last(false);
    let hub = EventHub::connect(log.clone(), config).await.unwrap();

    let start = Instant::now();
    let result = hub.fire("order.placed", Payload::new()).await;

    assert!(matches!(result, Err(EventsError::Connectivity { attempts: 4 })));
    assert_eq!(start.elapsed(), Duration::from_millis(400));

    // Nothing scheduled after failure: reconnecting later appends nothing
    log.set_connected(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(log.is_empty("events"));
}

#[tokio::test(start_paused = true)]
async fn test_fire_retries_until_connected() {
    let log = Arc::new(MemoryLog::disconnected());
    let config = EventsConfig::default().with_start_from_last(false);
    let hub = EventHub::connect(log.clone(), config).await.unwrap();

    let (tx, mut rx) = unbounded_channel();
    hub.on("order.placed", move |event: &EventObject| {
        let _ = tx.send(event.clone());
    });

    let connector = {
        let log = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            log.set_connected(true);
        })
    };

    hub.fire("order.placed", Payload::new()).await.unwrap();
    connector.await.unwrap();

    let event = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, "order.placed");
}

#[tokio::test(start_paused = true)]
async fn test_fire_retry_count_is_configurable() {
    let log = Arc::new(MemoryLog::disconnected());
    let config = EventsConfig::default()
        .with_start_from_last(false)
        .with_fire_retries(1)
        .with_retry_delay(Duration::from_millis(10));
    let hub = EventHub::connect(log, config).await.unwrap();

    let start = Instant::now();
    let result = hub.fire("x", Payload::new()).await;
    assert!(matches!(result, Err(EventsError::Connectivity { attempts: 2 })));
    assert_eq!(start.elapsed(), Duration::from_millis(20));
}

// --- Cursor resolution ---

#[tokio::test]
async fn test_connect_fails_when_cursor_unresolvable() {
    let log = Arc::new(MemoryLog::disconnected());
    let result = EventHub::connect(log.clone(), EventsConfig::default()).await;

    assert!(matches!(result, Err(EventsError::CursorResolution(_))));
    assert_eq!(log.feed_count(), 0);
}

// --- Malformed records ---

#[tokio::test]
async fn test_untyped_delta_reaches_nobody() {
    init_tracing();
    let log = Arc::new(MemoryLog::new());
    let hub = EventHub::connect(log.clone(), EventsConfig::default())
        .await
        .unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    hub.on_any(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    log.inject(
        "events",
        Delta::new(DeltaKind::Insert, EventKey::from("k1"), untyped(1)),
    );
    settle().await;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(hub.stats().discarded, 1);
    assert_eq!(hub.state(), ReconcilerState::Attached);
}

#[tokio::test]
async fn test_keyless_delta_is_discarded_and_feed_continues() {
    let log = Arc::new(MemoryLog::new());
    let hub = EventHub::connect(log.clone(), EventsConfig::default())
        .await
        .unwrap();

    let (tx, mut rx) = unbounded_channel();
    hub.on("a", move |event| {
        let _ = tx.send(event.clone());
    });

    log.inject(
        "events",
        Delta {
            kind: DeltaKind::Insert,
            key: None,
            record: EventRecord::at("a", 1, Payload::new()),
        },
    );
    hub.fire("a", Payload::new()).await.unwrap();

    let event = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!event.key.is_empty());
    settle().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(hub.stats().discarded, 1);
    assert_eq!(hub.stats().delivered, 1);
}

#[test]
fn test_record_from_json_without_type() {
    let record = EventRecord::from_json(serde_json::json!({"data": {"x": 1}})).unwrap();
    assert_eq!(record.event_type, None);
    assert_eq!(record.created_at, 0);
}

// --- Listener failures ---

#[tokio::test]
async fn test_panicking_listener_does_not_stop_feed() {
    init_tracing();
    let log = Arc::new(MemoryLog::new());
    let hub = EventHub::connect(log, EventsConfig::default()).await.unwrap();

    hub.on("job", |_| panic!("listener bug"));
    let (tx, mut rx) = unbounded_channel();
    hub.on("job", move |event| {
        let _ = tx.send(event.clone());
    });

    for _ in 0..2 {
        hub.fire("job", Payload::new()).await.unwrap();
    }

    for _ in 0..2 {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(hub.state(), ReconcilerState::Attached);
}

// --- Lifecycle ---

#[tokio::test]
async fn test_hub_start_twice_is_rejected() {
    let log = Arc::new(MemoryLog::new());
    let mut hub = EventHub::new(log, EventsConfig::default());
    hub.start().await.unwrap();

    let result = hub.start().await;
    assert!(matches!(
        result,
        Err(EventsError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_closed_stream_stays_closed() {
    let log = MemoryLog::new();
    let mut feed = log
        .subscribe_from("events", eventrelay::Cursor::Beginning)
        .await
        .unwrap();

    feed.close();
    log.append("events", &EventRecord::at("a", 1, Payload::new()))
        .await
        .unwrap();

    assert!(feed.is_closed());
    assert!(feed.next().await.is_none());
    assert!(feed.next().await.is_none());
}

// --- File backend ---

#[test]
fn test_file_log_locked() {
    let dir = TempDir::new().unwrap();
    let config = FileLogConfig::new(dir.path().join("log"));

    let _first = FileLog::open(config.clone()).unwrap();
    let second = FileLog::open(config);
    assert!(matches!(second, Err(EventsError::Locked)));
}

#[test]
fn test_file_log_rejects_corrupt_entry() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("log");
    std::fs::create_dir_all(&log_dir).unwrap();
    std::fs::write(log_dir.join("events.log"), b"NOPE-not-a-log-entry").unwrap();

    let log = FileLog::open(FileLogConfig::new(&log_dir)).unwrap();
    assert!(matches!(
        log.len("events"),
        Err(EventsError::InvalidFormat(_))
    ));
}

// --- Configuration ---

#[test]
fn test_invalid_config_json() {
    let result = EventsConfig::from_json_str("{\"fireRetries\": \"three\"}");
    assert!(matches!(result, Err(EventsError::Serialization(_))));
}
