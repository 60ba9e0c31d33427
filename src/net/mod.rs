//! Network layer used by port-forward proxies.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection on a port-forward's local port
//!     → listener.rs (accept, connection limit)
//!     → connection.rs (connection id, live-connection count)
//!     → proxy::port_forward (dial remote, copy bytes both ways)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion on a single forward
//! - Permits and guards are RAII so a panicking tunnel task still releases its slot

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
