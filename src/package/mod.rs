//! Package subsystem.
//!
//! # Data Flow
//! ```text
//! Route/proxy registered  → registry.rs (assign to package, move if renamed)
//! Route/proxy deleted     → registry.rs (remove, prune empty package)
//! Management API          → registry.rs (list packages and their members)
//! ```

pub mod registry;

pub use registry::{Package, PackageRegistry};
