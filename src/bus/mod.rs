//! In-process publish/subscribe registry.
//!
//! The bus maps event-type names to ordered lists of listeners:
//! - Callback listeners run synchronously during `deliver`
//! - Wildcard listeners see every delivered event
//! - Channel listeners receive copies through a bounded buffer and are
//!   dropped when they fall behind
//!
//! # Example
//!
//! ```ignore
//! let bus = LocalBus::new();
//!
//! let handle = bus.on("order.placed", |event| {
//!     println!("order {}", event.data["id"]);
//! });
//!
//! bus.deliver("order.placed", &event);
//! handle.unsubscribe();
//! ```

mod registry;
mod types;

pub use registry::LocalBus;
pub use types::{EventReceiver, Listener, ListenerHandle, ListenerId};
