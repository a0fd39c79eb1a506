//! # Event Relay
//!
//! Distributes named, payload-bearing events across otherwise-disconnected
//! application instances by relaying them through a remote append-only log,
//! and fans them out to in-process listeners.
//!
//! ## Core Concepts
//!
//! - **Remote log**: Append-only, order-queryable record store with live feeds
//! - **Local bus**: Event-type name to ordered listeners, synchronous fan-out
//! - **Catch-up**: Reconnecting clients start after the latest record
//! - **Publisher**: Appends fired events, retrying while the log is unreachable
//! - **Reconciler**: Turns live feed deltas into typed local events
//!
//! ## Example
//!
//! ```ignore
//! use eventrelay::{EventHub, EventsConfig, MemoryLog};
//!
//! let log = Arc::new(MemoryLog::new());
//! let hub = EventHub::connect(log, EventsConfig::default()).await?;
//!
//! let handle = hub.on("order.placed", |event| {
//!     println!("{} {:?}", event.key, event.data);
//! });
//!
//! hub.fire("order.placed", payload).await?;
//!
//! handle.unsubscribe();
//! hub.close().await?;
//! ```

pub mod bus;
pub mod catchup;
pub mod config;
pub mod error;
pub mod hub;
pub mod publisher;
pub mod reconciler;
pub mod remote;
pub mod types;

// Re-exports
pub use bus::{EventReceiver, Listener, ListenerHandle, ListenerId, LocalBus};
pub use catchup::{CatchupResolver, StartMode};
pub use config::{EventsConfig, DEFAULT_COLLECTION, DEFAULT_RETRIES};
pub use error::{EventsError, Result};
pub use hub::{EventHub, SingleEvent};
pub use publisher::{Publisher, RetryPolicy};
pub use reconciler::{Reconciler, ReconcilerState, ReconcilerStats};
pub use remote::{DeltaStream, FeedId, FileLog, FileLogConfig, MemoryLog, RemoteLog};
pub use types::*;
