//! Listener registry and synchronous fan-out.

use crate::types::EventObject;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use super::types::{EventReceiver, Listener, ListenerHandle, ListenerId};

#[derive(Clone)]
enum Target {
    Callback(Listener),
    Channel(Sender<EventObject>),
}

/// Internal registration state.
#[derive(Clone)]
struct Registration {
    id: ListenerId,
    active: Arc<AtomicBool>,
    target: Target,
}

impl Registration {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn revoke(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Returns false if the listener should be dropped.
    fn invoke(&self, event_type: &str, event: &EventObject) -> bool {
        match &self.target {
            Target::Callback(listener) => {
                if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                    error!(
                        listener = self.id.0,
                        event_type,
                        key = %event.key,
                        "listener panicked; continuing delivery"
                    );
                }
                true
            }
            Target::Channel(sender) => match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!(listener = self.id.0, event_type, "dropping slow channel listener");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        }
    }
}

#[derive(Default)]
struct Registry {
    typed: HashMap<String, Vec<Registration>>,
    wildcard: Vec<Registration>,
}

/// In-process mapping from event type to ordered listeners.
///
/// Construct one per application scope with [`LocalBus::new`] and share the
/// `Arc`.
pub struct LocalBus {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a callback for `event_type`.
    pub fn on<F>(self: &Arc<Self>, event_type: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&EventObject) + Send + Sync + 'static,
    {
        self.register(Some(event_type), Target::Callback(Arc::new(listener)))
    }

    /// Register a callback for every delivered event.
    pub fn on_any<F>(self: &Arc<Self>, listener: F) -> ListenerHandle
    where
        F: Fn(&EventObject) + Send + Sync + 'static,
    {
        self.register(None, Target::Callback(Arc::new(listener)))
    }

    /// Register a bounded channel for `event_type`.
    ///
    /// The listener is dropped once `buffer_size` events are waiting.
    pub fn listen(self: &Arc<Self>, event_type: &str, buffer_size: usize) -> EventReceiver {
        let (sender, receiver) = bounded(buffer_size);
        let handle = self.register(Some(event_type), Target::Channel(sender));
        EventReceiver { handle, receiver }
    }

    fn register(self: &Arc<Self>, event_type: Option<&str>, target: Target) -> ListenerHandle {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let active = Arc::new(AtomicBool::new(true));
        let registration = Registration {
            id,
            active: active.clone(),
            target,
        };

        {
            let mut registry = self.registry.write();
            match event_type {
                Some(name) => registry
                    .typed
                    .entry(name.to_string())
                    .or_default()
                    .push(registration),
                None => registry.wildcard.push(registration),
            }
        }

        ListenerHandle {
            id,
            event_type: event_type.map(str::to_string),
            active,
            bus: Arc::downgrade(self),
        }
    }

    /// Remove a registration. Unknown ids are ignored.
    pub(super) fn remove(&self, event_type: Option<&str>, id: ListenerId) {
        let mut registry = self.registry.write();
        let list = match event_type {
            Some(name) => match registry.typed.get_mut(name) {
                Some(list) => list,
                None => return,
            },
            None => &mut registry.wildcard,
        };

        if let Some(pos) = list.iter().position(|r| r.id == id) {
            list.remove(pos).revoke();
        }

        if let Some(name) = event_type {
            if registry.typed.get(name).is_some_and(|l| l.is_empty()) {
                registry.typed.remove(name);
            }
        }
    }

    /// Invoke every listener of `event_type`, then wildcard listeners, in
    /// subscription order.
    ///
    /// Listeners run outside the registry lock; registrations made during
    /// delivery apply from the next delivery, revocations apply immediately.
    /// Returns the number of listeners invoked.
    pub fn deliver(&self, event_type: &str, event: &EventObject) -> usize {
        let targets: Vec<(Option<String>, Registration)> = {
            let registry = self.registry.read();
            registry
                .typed
                .get(event_type)
                .into_iter()
                .flatten()
                .map(|r| (Some(event_type.to_string()), r.clone()))
                .chain(registry.wildcard.iter().map(|r| (None, r.clone())))
                .collect()
        };

        let mut invoked = 0;
        let mut to_remove = Vec::new();

        for (key, registration) in targets {
            if !registration.is_active() {
                continue;
            }
            invoked += 1;
            if !registration.invoke(event_type, event) {
                to_remove.push((key, registration.id));
            }
        }

        for (key, id) in to_remove {
            self.remove(key.as_deref(), id);
        }

        invoked
    }

    /// Number of listeners registered for `event_type` (wildcards excluded).
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.registry
            .read()
            .typed
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of wildcard listeners.
    pub fn wildcard_count(&self) -> usize {
        self.registry.read().wildcard.len()
    }

    /// Revoke every registration.
    pub fn clear(&self) {
        let mut registry = self.registry.write();
        for registration in registry.typed.values().flatten() {
            registration.revoke();
        }
        for registration in &registry.wildcard {
            registration.revoke();
        }
        registry.typed.clear();
        registry.wildcard.clear();
    }
}
