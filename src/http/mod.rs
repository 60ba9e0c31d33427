//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, middleware, catch-all dispatch)
//!     → request.rs (request ID assigned and propagated)
//!     → Gateway::target (tree, then reverse proxies, then not found)
//!     → local handler | upstream client
//!     → response.rs (filter upstream headers, JSON errors)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use response::{copy_response_headers, error_response};
pub use server::HttpServer;
