//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that the migration source differs from the current version
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, StoreKind};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }

    let identity = &config.gateway;
    if identity.name.trim().is_empty() {
        errors.push(ValidationError::new("gateway.name", "must not be empty"));
    }
    if identity.version.trim().is_empty() {
        errors.push(ValidationError::new("gateway.version", "must not be empty"));
    }
    if identity.previous_version.as_deref() == Some(identity.version.as_str()) {
        errors.push(ValidationError::new(
            "gateway.previous_version",
            "must differ from gateway.version",
        ));
    }

    let base = &config.admin.base_path;
    if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
        errors.push(ValidationError::new(
            "admin.base_path",
            "must start with '/' and not end with '/'",
        ));
    }

    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_secs", "must be > 0"));
    }
    if config.port_forward.dial_timeout_secs == 0 {
        errors.push(ValidationError::new("port_forward.dial_timeout_secs", "must be > 0"));
    }
    if config.port_forward.max_connections == 0 {
        errors.push(ValidationError::new("port_forward.max_connections", "must be > 0"));
    }

    if config.store.kind == StoreKind::File
        && config.store.path.as_deref().map_or(true, |p| p.trim().is_empty())
    {
        errors.push(ValidationError::new("store.path", "required for the file store"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
