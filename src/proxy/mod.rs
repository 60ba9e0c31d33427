//! Proxy subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyDefinition       → Proxy::reverse        → matched by longest path prefix after a tree miss
//! PortForwardDefinition → Proxy::port_forward   → port_forward.rs (own TCP listener, raw tunnel)
//! Proxy                 → ProxyRecord           → persisted snapshot / listings
//! ```
//!
//! # Design Decisions
//! - Reverse proxies are pure data; port-forwards own a live listener behind an `Arc`
//!   so the gateway lock is never held while binding or stopping
//! - A definition that fails validation never creates a proxy

pub mod port_forward;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::net::ListenerError;

pub use port_forward::{Endpoint, PortForward, PortForwardSettings};

/// Proxy definition and lifecycle errors.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("listen path `{0}` must start with '/'")]
    InvalidPath(String),

    #[error("invalid target `{target}`: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("`{key}` is already served by proxy `{owner}`")]
    DuplicateKey { key: String, owner: String },

    #[error("port-forward `{id}` could not start: {source}")]
    Bind {
        id: String,
        #[source]
        source: ListenerError,
    },
}

/// Serialized proxy kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKindTag {
    #[default]
    ReverseProxy,
    PortForward,
}

/// Reverse-proxy definition as accepted by the management API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Listen path prefix.
    #[serde(default)]
    pub path: String,
    /// Target base URL.
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub package_name: String,
}

/// Port-forward definition as accepted by the management API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub remote_host: String,
    #[serde(default)]
    pub remote_port: u16,
    /// Must be non-zero: the port identifies the forward in the snapshot.
    #[serde(default)]
    pub local_port: u16,
    #[serde(default)]
    pub package_name: String,
}

impl PortForwardDefinition {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            remote_host: self.remote_host.trim().to_string(),
            remote_port: self.remote_port,
            local_port: self.local_port,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ProxyError> {
        if self.local_port == 0 {
            return Err(ProxyError::MissingField("local_port"));
        }
        if self.remote_host.trim().is_empty() {
            return Err(ProxyError::MissingField("remote_host"));
        }
        if self.remote_port == 0 {
            return Err(ProxyError::MissingField("remote_port"));
        }
        if self.package_name.trim().is_empty() {
            return Err(ProxyError::MissingField("package_name"));
        }
        Ok(())
    }
}

/// What a proxy does.
#[derive(Debug, Clone)]
pub enum ProxyKind {
    ReverseProxy { path: String, target: Url },
    PortForward(Arc<PortForward>),
}

/// A registered proxy.
#[derive(Debug, Clone)]
pub struct Proxy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub package_name: String,
    pub kind: ProxyKind,
}

impl Proxy {
    /// Build a reverse proxy from a definition.
    pub fn reverse(def: &ProxyDefinition, id: String) -> Result<Self, ProxyError> {
        if def.path.trim().is_empty() {
            return Err(ProxyError::MissingField("path"));
        }
        if !def.path.starts_with('/') {
            return Err(ProxyError::InvalidPath(def.path.clone()));
        }
        if def.target.trim().is_empty() {
            return Err(ProxyError::MissingField("target"));
        }
        if def.package_name.trim().is_empty() {
            return Err(ProxyError::MissingField("package_name"));
        }
        let target = Url::parse(def.target.trim()).map_err(|e| ProxyError::InvalidTarget {
            target: def.target.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidTarget {
                target: def.target.clone(),
                reason: format!("unsupported scheme `{}`", target.scheme()),
            });
        }

        Ok(Self {
            id,
            name: def.name.clone(),
            description: def.description.clone(),
            package_name: def.package_name.clone(),
            kind: ProxyKind::ReverseProxy {
                path: normalize_prefix(&def.path),
                target,
            },
        })
    }

    /// Build a port-forward proxy. The listener is not started.
    pub fn port_forward(
        def: &PortForwardDefinition,
        id: String,
        settings: PortForwardSettings,
    ) -> Result<Self, ProxyError> {
        let forward = PortForward::new(id, def.endpoint(), settings);
        Self::over_listener(def, Arc::new(forward))
    }

    /// Build a port-forward proxy around an existing listener, keeping its id.
    pub fn over_listener(
        def: &PortForwardDefinition,
        forward: Arc<PortForward>,
    ) -> Result<Self, ProxyError> {
        def.validate()?;
        Ok(Self {
            id: forward.id().to_string(),
            name: def.name.clone(),
            description: def.description.clone(),
            package_name: def.package_name.clone(),
            kind: ProxyKind::PortForward(forward),
        })
    }

    /// Snapshot map key: the listen path, or `:{local_port}` for port-forwards.
    pub fn key(&self) -> String {
        match &self.kind {
            ProxyKind::ReverseProxy { path, .. } => path.clone(),
            ProxyKind::PortForward(forward) => format!(":{}", forward.endpoint().local_port),
        }
    }

    pub fn port_forward_handle(&self) -> Option<&Arc<PortForward>> {
        match &self.kind {
            ProxyKind::PortForward(forward) => Some(forward),
            ProxyKind::ReverseProxy { .. } => None,
        }
    }

    /// If this reverse proxy serves `path`, the length of the matched prefix.
    pub fn prefix_len(&self, path: &str) -> Option<usize> {
        let ProxyKind::ReverseProxy { path: prefix, .. } = &self.kind else {
            return None;
        };
        if prefix == "/" {
            return Some(1);
        }
        let rest = path.strip_prefix(prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(prefix.len())
    }

    /// Outbound URL for an inbound path (and query) served by this reverse proxy.
    pub fn forward_url(&self, path: &str, query: Option<&str>) -> Option<String> {
        let ProxyKind::ReverseProxy { path: prefix, target } = &self.kind else {
            return None;
        };
        let rest = if prefix == "/" {
            path
        } else {
            path.strip_prefix(prefix.as_str()).unwrap_or(path)
        };
        let mut url = target.as_str().trim_end_matches('/').to_string();
        if !rest.is_empty() && !rest.starts_with('/') {
            url.push('/');
        }
        url.push_str(rest);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        Some(url)
    }

    pub fn record(&self) -> ProxyRecord {
        let mut record = ProxyRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            package_name: self.package_name.clone(),
            ..Default::default()
        };
        match &self.kind {
            ProxyKind::ReverseProxy { path, target } => {
                record.kind = ProxyKindTag::ReverseProxy;
                record.path = Some(path.clone());
                record.target = Some(target.to_string());
            }
            ProxyKind::PortForward(forward) => {
                let endpoint = forward.endpoint();
                record.kind = ProxyKindTag::PortForward;
                record.remote_host = Some(endpoint.remote_host.clone());
                record.remote_port = Some(endpoint.remote_port);
                record.local_port = Some(endpoint.local_port);
            }
        }
        record
    }

    /// Record plus runtime state, for listings.
    pub fn status(&self) -> ProxyStatus {
        let (started, local_addr, active_connections) = match &self.kind {
            ProxyKind::ReverseProxy { .. } => (None, None, None),
            ProxyKind::PortForward(forward) => (
                Some(forward.is_started()),
                forward.local_addr().map(|addr| addr.to_string()),
                Some(forward.active_connections()),
            ),
        };
        ProxyStatus {
            record: self.record(),
            started,
            local_addr,
            active_connections,
        }
    }
}

pub(crate) fn normalize_prefix(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Persisted form of a proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: ProxyKindTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(default)]
    pub package_name: String,
}

/// A persisted proxy turned back into its definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEntry {
    Reverse(ProxyDefinition),
    PortForward(PortForwardDefinition),
}

impl ProxyRecord {
    pub fn into_entry(self) -> ProxyEntry {
        let id = Some(self.id).filter(|id| !id.is_empty());
        match self.kind {
            ProxyKindTag::ReverseProxy => ProxyEntry::Reverse(ProxyDefinition {
                id,
                name: self.name,
                description: self.description,
                path: self.path.unwrap_or_default(),
                target: self.target.unwrap_or_default(),
                package_name: self.package_name,
            }),
            ProxyKindTag::PortForward => ProxyEntry::PortForward(PortForwardDefinition {
                id,
                name: self.name,
                description: self.description,
                remote_host: self.remote_host.unwrap_or_default(),
                remote_port: self.remote_port.unwrap_or_default(),
                local_port: self.local_port.unwrap_or_default(),
                package_name: self.package_name,
            }),
        }
    }
}

/// Proxy listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStatus {
    #[serde(flatten)]
    pub record: ProxyRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_connections: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reverse(path: &str, target: &str) -> Proxy {
        let def = ProxyDefinition {
            name: "svc".into(),
            path: path.into(),
            target: target.into(),
            package_name: "pkg".into(),
            ..Default::default()
        };
        Proxy::reverse(&def, "p1".into()).unwrap()
    }

    #[test]
    fn reverse_proxy_requires_fields() {
        let mut def = ProxyDefinition {
            path: "/api".into(),
            target: "http://svc:8080".into(),
            ..Default::default()
        };
        assert!(matches!(
            Proxy::reverse(&def, "p".into()),
            Err(ProxyError::MissingField("package_name"))
        ));

        def.package_name = "pkg".into();
        def.target = "ftp://svc".into();
        assert!(matches!(
            Proxy::reverse(&def, "p".into()),
            Err(ProxyError::InvalidTarget { .. })
        ));

        def.target = "http://svc".into();
        def.path = "api".into();
        assert!(matches!(
            Proxy::reverse(&def, "p".into()),
            Err(ProxyError::InvalidPath(_))
        ));
    }

    #[test]
    fn prefix_matches_whole_segments_only() {
        let proxy = reverse("/api/", "http://svc:8080");
        assert_eq!(proxy.key(), "/api");
        assert_eq!(proxy.prefix_len("/api"), Some(4));
        assert_eq!(proxy.prefix_len("/api/users"), Some(4));
        assert_eq!(proxy.prefix_len("/apix"), None);
        assert_eq!(proxy.prefix_len("/other"), None);
    }

    #[test]
    fn forward_url_appends_remainder_and_query() {
        let proxy = reverse("/api", "http://svc:8080/base/");
        assert_eq!(
            proxy.forward_url("/api/users/1", Some("a=1")).unwrap(),
            "http://svc:8080/base/users/1?a=1"
        );
        assert_eq!(proxy.forward_url("/api", None).unwrap(), "http://svc:8080/base");

        let root = reverse("/", "http://svc");
        assert_eq!(root.prefix_len("/anything"), Some(1));
        assert_eq!(root.forward_url("/x/y", Some("")).unwrap(), "http://svc/x/y");
    }

    #[test]
    fn record_round_trips_to_definition() {
        let proxy = reverse("/api", "http://svc:8080");
        let record = proxy.record();
        assert_eq!(record.kind, ProxyKindTag::ReverseProxy);
        assert_eq!(record.path.as_deref(), Some("/api"));

        match record.into_entry() {
            ProxyEntry::Reverse(def) => {
                assert_eq!(def.id.as_deref(), Some("p1"));
                assert_eq!(def.path, "/api");
                assert!(Proxy::reverse(&def, "p1".into()).is_ok());
            }
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn port_forward_definition_validation() {
        let def = PortForwardDefinition {
            remote_host: "db".into(),
            remote_port: 5432,
            local_port: 15432,
            package_name: "pkg".into(),
            ..Default::default()
        };
        let proxy = Proxy::port_forward(&def, "pf".into(), PortForwardSettings::default()).unwrap();
        assert_eq!(proxy.key(), ":15432");
        let status = proxy.status();
        assert_eq!(status.started, Some(false));
        assert_eq!(status.record.remote_port, Some(5432));

        let missing = PortForwardDefinition {
            remote_port: 0,
            ..def
        };
        assert!(matches!(
            Proxy::port_forward(&missing, "pf".into(), PortForwardSettings::default()),
            Err(ProxyError::MissingField("remote_port"))
        ));
    }
}
