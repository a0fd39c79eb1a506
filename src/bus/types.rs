//! Listener types for the local bus.

use super::LocalBus;
use crate::types::EventObject;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Callback invoked for each delivered event.
pub type Listener = Arc<dyn Fn(&EventObject) + Send + Sync>;

/// Unique identifier for a listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Handle returned by subscription; revokes exactly one registration.
///
/// Dropping the handle does not unsubscribe.
#[derive(Clone)]
pub struct ListenerHandle {
    pub(super) id: ListenerId,
    /// `None` for wildcard listeners.
    pub(super) event_type: Option<String>,
    pub(super) active: Arc<AtomicBool>,
    pub(super) bus: Weak<LocalBus>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// Whether the registration is still live.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove the registration. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.event_type.as_deref(), self.id);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Channel-backed listener.
pub struct EventReceiver {
    pub handle: ListenerHandle,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<EventObject>,
}

impl EventReceiver {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<EventObject, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<EventObject, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<EventObject, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }
}
