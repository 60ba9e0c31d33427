//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → handed to startup, which builds each subsystem from its section
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; routes and proxies change at runtime through
//!   the management API, not the file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, ClusterConfig, GatewayConfig, IdentityConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, PortForwardConfig, StoreConfig, StoreKind, TimeoutConfig,
    UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
