//! Runtime-reconfigurable API gateway core.
//!
//! Routes and proxies are registered at runtime through the management API (or
//! embedding code), persisted as a snapshot, and kept in sync across instances over
//! an event bus.

// Request path
pub mod http;
pub mod routing;
pub mod upstream;

// Runtime state
pub mod gateway;
pub mod package;
pub mod proxy;

// Persistence and cluster sync
pub mod cluster;
pub mod store;

// Management surface
pub mod admin;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::GatewayConfig;
pub use gateway::{Gateway, GatewayBuilder, GatewayError, Origin};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
