//! Cross-instance synchronization.
//!
//! # Data Flow
//! ```text
//! local mutation  → gateway publishes ClusterEvent on route.set / route.remove / route.reset
//! EventBus        → sync.rs (every subscribed instance)
//!                 → from_id == own id? drop
//!                 → otherwise replay with Origin::Peer (persist, no publish)
//! ```
//!
//! # Design Decisions
//! - Peers never re-publish, so an event travels exactly one hop
//! - Malformed events are dropped with a warning; the subscriber loop keeps running

pub mod bus;
pub mod events;
pub mod sync;

pub use bus::{BusError, EventBus, LocalBus, NoopBus};
pub use events::{package_reset_topic, ClusterEvent, EventPayload};
pub use sync::{ClusterSync, SyncOutcome};
