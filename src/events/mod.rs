//! Container event propagation.
//!
//! ```text
//!   engine events ──► EventBus ──route──► Invalidation::Entity  ─┐
//!        │                 │                                      ├─► broadcast
//!        │                 └─state change─► Debouncer ─► Class ──┘
//!        └─ disconnect ─► backoff ─► reconnect ─► Invalidation::All
//! ```
//!
//! Connection status is published on a `watch` channel so dependents can
//! fall back to polling while the stream is down.

mod bus;
mod debounce;
mod mapping;

pub use bus::{ConnectionState, ConnectionStatus, EventBus, EventBusHandle, Invalidation};
pub use debounce::Debouncer;
pub use mapping::{route_by_name, route_event};
