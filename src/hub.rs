//! Lifecycle wiring: one bus and one live feed, opened and closed together.

use crate::bus::{EventReceiver, ListenerHandle, LocalBus};
use crate::config::EventsConfig;
use crate::error::Result;
use crate::publisher::Publisher;
use crate::reconciler::{Reconciler, ReconcilerState, ReconcilerStats};
use crate::remote::RemoteLog;
use crate::types::{EventObject, Payload};
use std::sync::Arc;
use tracing::info;

/// Entry point for applications: subscribe with [`on`](Self::on), publish
/// with [`fire`](Self::fire).
///
/// The bus lives exactly as long as the hub's live feed; [`close`](Self::close)
/// (or dropping the hub) tears both down.
pub struct EventHub {
    config: EventsConfig,
    bus: Arc<LocalBus>,
    publisher: Publisher,
    reconciler: Reconciler,
}

impl EventHub {
    /// Create the bus and attach a live feed from the configured start point.
    ///
    /// Fails if the catch-up cursor cannot be resolved or the feed cannot be
    /// opened.
    pub async fn connect(log: Arc<dyn RemoteLog>, config: EventsConfig) -> Result<Self> {
        let mut hub = Self::new(log, config);
        hub.start().await?;
        Ok(hub)
    }

    /// Create the bus without opening the live feed.
    ///
    /// Listeners registered before [`start`](Self::start) observe the replay
    /// of history when `start_from_last` is off.
    pub fn new(log: Arc<dyn RemoteLog>, config: EventsConfig) -> Self {
        let bus = LocalBus::new();
        let publisher = Publisher::new(log.clone(), config.collection.clone(), config.retry_policy());
        let reconciler = Reconciler::new(
            log,
            bus.clone(),
            config.collection.clone(),
            config.start_mode(),
        );

        Self {
            config,
            bus,
            publisher,
            reconciler,
        }
    }

    /// Open the live feed.
    pub async fn start(&mut self) -> Result<()> {
        self.reconciler.start().await?;
        info!(
            collection = %self.config.collection,
            start_from_last = self.config.start_from_last,
            "event hub connected"
        );
        Ok(())
    }

    pub fn config(&self) -> &EventsConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<LocalBus> {
        &self.bus
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn state(&self) -> ReconcilerState {
        self.reconciler.state()
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.reconciler.stats()
    }

    /// Register a listener for `event_type`.
    pub fn on<F>(&self, event_type: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&EventObject) + Send + Sync + 'static,
    {
        self.bus.on(event_type, listener)
    }

    /// Register a listener for every event.
    pub fn on_any<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&EventObject) + Send + Sync + 'static,
    {
        self.bus.on_any(listener)
    }

    /// Register a channel listener for `event_type`.
    pub fn listen(&self, event_type: &str) -> EventReceiver {
        self.bus.listen(event_type, self.config.listener_buffer)
    }

    /// Publish an event through the remote log.
    pub async fn fire(&self, event_type: &str, data: Payload) -> Result<()> {
        self.publisher.fire(event_type, data).await
    }

    /// Bind a listener and a publisher to one event name.
    pub fn single<F>(&self, name: &str, listener: F) -> SingleEvent
    where
        F: Fn(&EventObject) + Send + Sync + 'static,
    {
        SingleEvent {
            name: name.to_string(),
            handle: self.on(name, listener),
            publisher: self.publisher.clone(),
        }
    }

    /// Close the live feed and revoke every listener.
    pub async fn close(mut self) -> Result<()> {
        self.reconciler.detach().await?;
        self.bus.clear();
        info!(collection = %self.config.collection, "event hub closed");
        Ok(())
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        self.bus.clear();
    }
}

/// A listener bound to one event name that can also fire that event.
///
/// The name is fixed for the lifetime of the value; to listen to another
/// name, create another `SingleEvent`.
pub struct SingleEvent {
    name: String,
    handle: ListenerHandle,
    publisher: Publisher,
}

impl SingleEvent {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish `data` under this event's name.
    pub async fn fire(&self, data: Payload) -> Result<()> {
        self.publisher.fire(&self.name, data).await
    }

    /// Stop listening. Idempotent.
    pub fn unlisten(&self) {
        self.handle.unsubscribe();
    }

    pub fn handle(&self) -> &ListenerHandle {
        &self.handle
    }
}
