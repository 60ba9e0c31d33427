//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration for inbound HTTP.
    pub listener: ListenerConfig,

    /// Gateway identity; the snapshot key is derived from it.
    pub gateway: IdentityConfig,

    /// Management API settings.
    pub admin: AdminConfig,

    /// Outbound HTTP client settings.
    pub upstream: UpstreamConfig,

    /// Port-forward listener settings.
    pub port_forward: PortForwardConfig,

    /// Snapshot store.
    pub store: StoreConfig,

    /// Cross-instance synchronization.
    pub cluster: ClusterConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent inbound requests.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Gateway identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub name: String,

    pub version: String,

    /// Version whose snapshot is migrated when none exists for `version`.
    pub previous_version: Option<String>,

    /// Identifier used for echo suppression; generated when absent.
    pub instance_id: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            previous_version: None,
            instance_id: None,
        }
    }
}

/// Management API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Prefix for management routes (e.g. "/_gateway"); empty mounts them at the root.
    pub base_path: String,

    /// API key for private routes (Bearer token). Empty disables the check.
    pub api_key: String,
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub connect_timeout_secs: u64,

    pub pool_idle_timeout_secs: u64,

    /// Accept invalid TLS certificates from internal mesh targets.
    pub insecure_skip_verify: bool,

    /// Maximum buffered inbound request body.
    pub max_body_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            pool_idle_timeout_secs: 90,
            insecure_skip_verify: true,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Port-forward configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortForwardConfig {
    /// Host every port-forward binds its local port on.
    pub bind_host: String,

    pub dial_timeout_secs: u64,

    /// Maximum concurrent tunnels per port-forward.
    pub max_connections: usize,
}

impl Default for PortForwardConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            dial_timeout_secs: 10,
            max_connections: 1_024,
        }
    }
}

/// Store backend.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

/// Snapshot store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,

    /// Directory for the file store.
    pub path: Option<String>,

    /// Lifetime of migration backups.
    pub backup_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            path: None,
            backup_ttl_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// Cluster synchronization configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClusterConfig {
    /// Publish mutations and replay peer events.
    pub enabled: bool,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.gateway.name, "gateway");
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert!(config.upstream.insecure_skip_verify);
        assert!(config.admin.base_path.is_empty());
    }

    #[test]
    fn sections_parse() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [gateway]
            name = "edge"
            version = "2"
            previous_version = "1"

            [store]
            kind = "file"
            path = "/var/lib/gateway"

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.gateway.name, "edge");
        assert_eq!(config.gateway.previous_version.as_deref(), Some("1"));
        assert_eq!(config.store.kind, StoreKind::File);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
