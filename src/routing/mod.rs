//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path, query)
//!     → resolver.rs (pick the method's tree)
//!     → tree.rs (segment walk; param.rs classifies each segment)
//!     → resolver.rs (render resolve template, collect path values)
//!     → target.rs (Local handler | Remote url + headers | NotFound)
//!
//! Registration:
//!     RouteDefinition
//!     → route.rs (validate, build Route)
//!     → tree.rs (check invariants, then create/replace nodes)
//! ```
//!
//! # Design Decisions
//! - One tree per HTTP method
//! - A node has any number of literal children and at most one parameterized child
//! - Query and matrix parameters always end the match
//! - Trees are plain data; locking belongs to the gateway instance that owns them

pub mod param;
pub mod resolver;
pub mod route;
pub mod target;
pub mod tree;

pub use param::ParamKind;
pub use resolver::{PathValues, Resolution};
pub use route::{
    local_handler, HeaderPolicy, Leaf, LeafKind, LocalHandler, Route, RouteDefinition, RouteError,
};
pub use target::Target;
pub use tree::{NodeRecord, RouteTree};
