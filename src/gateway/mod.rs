//! Gateway instance.
//!
//! # Data Flow
//! ```text
//! inbound request  → Gateway::target (read lock) → Target
//! mutation         → routes.rs / proxies.rs (write lock, no I/O)
//!                  → Persister::submit (background)
//!                  → EventBus::publish (awaited)
//! peer event       → cluster::sync → same entry points with Origin::Peer
//! startup          → bootstrap.rs (load or migrate, mount management routes)
//! ```
//!
//! # Design Decisions
//! - All routing state sits behind one reader/writer lock owned by the instance;
//!   nothing is global
//! - The lock is synchronous and never held across an await
//! - Port-forward lifecycle calls serialize on a separate async mutex because they
//!   await bind and drain

pub mod bootstrap;
pub mod proxies;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::admin::auth::{AllowAll, ApiKeyAuthenticator, Authenticator};
use crate::cluster::bus::{BusError, EventBus, NoopBus};
use crate::cluster::events::{ClusterEvent, EventPayload};
use crate::config::{GatewayConfig, UpstreamConfig};
use crate::http::response::error_response;
use crate::package::Package;
use crate::proxy::{PortForwardSettings, ProxyError, ProxyStatus};
use crate::routing::{Route, RouteError, Target};
use crate::store::{snapshot_key, KeyValueStore, MemoryStore, PersistStatus, Persister, StoreError};
use crate::upstream::{Upstream, UpstreamError};

pub use bootstrap::Bootstrap;
pub use state::{RouteSummary, RoutingState};

/// Who triggered a mutation, which decides its side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Management API or embedding code: persist and publish.
    Local,
    /// Replayed from another instance: persist only.
    Peer,
    /// Snapshot replay during startup: neither.
    Replay,
}

impl Origin {
    pub fn persists(self) -> bool {
        !matches!(self, Origin::Replay)
    }

    pub fn publishes(self) -> bool {
        matches!(self, Origin::Local)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Peer => "peer",
            Origin::Replay => "replay",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("route `{0}` not found")]
    RouteNotFound(String),

    #[error("proxy `{0}` not found")]
    ProxyNotFound(String),

    #[error("item {index}: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<GatewayError>,
    },
}

impl GatewayError {
    pub(crate) fn batch(index: usize, source: impl Into<GatewayError>) -> Self {
        GatewayError::Batch {
            index,
            source: Box::new(source.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Route(_) => StatusCode::BAD_REQUEST,
            GatewayError::Proxy(ProxyError::Bind { .. } | ProxyError::DuplicateKey { .. }) => {
                StatusCode::CONFLICT
            }
            GatewayError::Proxy(_) => StatusCode::BAD_REQUEST,
            GatewayError::RouteNotFound(_) | GatewayError::ProxyNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::Store(_) | GatewayError::Bus(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Upstream(e) => e.status(),
            GatewayError::Batch { source, .. } => source.status(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        error_response(self.status(), &self.to_string())
    }
}

/// Name, versions and instance id of a gateway.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Identity {
    pub name: String,
    pub version: String,
    pub previous_version: Option<String>,
    pub instance_id: String,
}

impl Identity {
    /// Store key of the current snapshot.
    pub fn snapshot_key(&self) -> String {
        snapshot_key(&self.name, &self.version)
    }

    /// Store key of the snapshot to migrate from, if any.
    pub fn previous_key(&self) -> Option<String> {
        self.previous_version
            .as_deref()
            .map(|previous| snapshot_key(&self.name, previous))
    }
}

struct Inner {
    identity: Identity,
    state: RwLock<RoutingState>,
    store: Arc<dyn KeyValueStore>,
    bus: Arc<dyn EventBus>,
    persister: Persister,
    upstream: Upstream,
    authenticator: Arc<dyn Authenticator>,
    port_forward: PortForwardSettings,
    admin_base: String,
    backup_ttl: Duration,
    lifecycle: tokio::sync::Mutex<()>,
}

/// A gateway instance. Clones share the same instance.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("identity", &self.inner.identity)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> GatewayBuilder {
        GatewayBuilder::new(name, version)
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.identity.instance_id
    }

    pub fn upstream(&self) -> &Upstream {
        &self.inner.upstream
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.inner.authenticator.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.store
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.inner.bus
    }

    /// Prefix of the management routes.
    pub fn admin_base(&self) -> &str {
        &self.inner.admin_base
    }

    /// Where `method path?query` goes.
    pub fn target(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Target {
        self.inner.state.read().target(method, path, query, headers)
    }

    pub fn route(&self, id: &str) -> Option<Arc<Route>> {
        self.inner.state.read().route(id)
    }

    pub fn routes(&self) -> Vec<RouteSummary> {
        self.inner
            .state
            .read()
            .routes()
            .iter()
            .map(|route| RouteSummary::from(route.as_ref()))
            .collect()
    }

    pub fn packages(&self) -> Vec<Package> {
        self.inner.state.read().packages().list().cloned().collect()
    }

    pub fn package(&self, name: &str) -> Option<Package> {
        self.inner.state.read().packages().get(name).cloned()
    }

    pub fn proxies(&self) -> Vec<ProxyStatus> {
        self.inner.state.read().proxy_statuses()
    }

    pub fn proxy(&self, id: &str) -> Option<ProxyStatus> {
        self.inner.state.read().proxy(id).map(|p| p.status())
    }

    /// Current routes and proxies in persisted form.
    pub fn snapshot(&self) -> crate::store::Snapshot {
        self.inner
            .state
            .read()
            .snapshot(&self.inner.identity.version)
    }

    /// Wait for every queued snapshot write.
    pub async fn flush(&self) -> PersistStatus {
        self.inner.persister.flush().await
    }

    /// Stop every port-forward and flush pending snapshot writes.
    pub async fn shutdown(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let forwards: Vec<_> = self
            .inner
            .state
            .read()
            .proxies()
            .filter_map(|p| p.port_forward_handle().cloned())
            .collect();
        for forward in forwards {
            forward.stop().await;
        }
        let status = self.flush().await;
        tracing::info!(
            gateway = %self.inner.identity.name,
            generation = status.generation,
            "Gateway shut down"
        );
    }

    /// Persist and publish after a committed mutation, as `origin` dictates.
    async fn commit(&self, origin: Origin, payload: EventPayload) {
        if origin.persists() {
            self.persist();
        }
        if origin.publishes() {
            self.publish(payload).await;
        }
    }

    /// Snapshot and generation are taken under one read guard, so a later mutation
    /// always gets a later generation.
    fn persist(&self) {
        let key = self.inner.identity.snapshot_key();
        let generation = {
            let state = self.inner.state.read();
            let snapshot = state.snapshot(&self.inner.identity.version);
            self.inner.persister.submit(key, snapshot)
        };
        tracing::trace!(generation, "Snapshot queued");
    }

    async fn publish(&self, payload: EventPayload) {
        let topic = payload.topic();
        let kind = payload.kind();
        let event = ClusterEvent::new(self.instance_id(), payload);
        let result = match serde_json::to_string(&event) {
            Ok(raw) => self.inner.bus.publish(&topic, raw).await,
            Err(e) => Err(BusError::from(e)),
        };
        match result {
            Ok(()) => tracing::debug!(topic = %topic, kind, event_id = %event.id, "Event published"),
            Err(e) => tracing::error!(topic = %topic, kind, error = %e, "Event publish failed"),
        }
    }
}

/// Builds a [`Gateway`]. Must be called inside a Tokio runtime.
pub struct GatewayBuilder {
    identity: Identity,
    store: Option<Arc<dyn KeyValueStore>>,
    bus: Option<Arc<dyn EventBus>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    upstream: UpstreamConfig,
    port_forward: PortForwardSettings,
    admin_base: String,
    backup_ttl: Duration,
}

impl GatewayBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            identity: Identity {
                name: name.into(),
                version: version.into(),
                previous_version: None,
                instance_id: Uuid::new_v4().to_string(),
            },
            store: None,
            bus: None,
            authenticator: None,
            upstream: UpstreamConfig::default(),
            port_forward: PortForwardSettings::default(),
            admin_base: String::new(),
            backup_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Builder with every setting taken from `config`. Store and bus are left to the caller.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut builder = Self::new(&config.gateway.name, &config.gateway.version)
            .upstream(config.upstream.clone())
            .port_forward(PortForwardSettings::from(&config.port_forward))
            .admin_base(&config.admin.base_path)
            .backup_ttl(Duration::from_secs(config.store.backup_ttl_secs));
        if let Some(previous) = &config.gateway.previous_version {
            builder = builder.previous_version(previous);
        }
        if let Some(instance_id) = &config.gateway.instance_id {
            builder = builder.instance_id(instance_id);
        }
        if !config.admin.api_key.is_empty() {
            builder = builder.authenticator(Arc::new(ApiKeyAuthenticator::new(
                &config.admin.api_key,
            )));
        }
        builder
    }

    pub fn previous_version(mut self, version: impl Into<String>) -> Self {
        self.identity.previous_version = Some(version.into());
        self
    }

    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.identity.instance_id = id.into();
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn upstream(mut self, config: UpstreamConfig) -> Self {
        self.upstream = config;
        self
    }

    pub fn port_forward(mut self, settings: PortForwardSettings) -> Self {
        self.port_forward = settings;
        self
    }

    pub fn admin_base(mut self, base: impl Into<String>) -> Self {
        self.admin_base = base.into();
        self
    }

    pub fn backup_ttl(mut self, ttl: Duration) -> Self {
        self.backup_ttl = ttl;
        self
    }

    /// Build an empty gateway. Call [`Gateway::bootstrap`] to load its snapshot.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let upstream = Upstream::new(&self.upstream)?;
        let persister = Persister::spawn(store.clone());

        tracing::debug!(
            gateway = %self.identity.name,
            version = %self.identity.version,
            instance_id = %self.identity.instance_id,
            "Gateway built"
        );

        Ok(Gateway {
            inner: Arc::new(Inner {
                state: RwLock::new(RoutingState::new(self.identity.name.clone())),
                identity: self.identity,
                store,
                bus: self.bus.unwrap_or_else(|| Arc::new(NoopBus)),
                persister,
                upstream,
                authenticator: self
                    .authenticator
                    .unwrap_or_else(|| Arc::new(AllowAll)),
                port_forward: self.port_forward,
                admin_base: self.admin_base,
                backup_ttl: self.backup_ttl,
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_side_effects() {
        assert!(Origin::Local.persists() && Origin::Local.publishes());
        assert!(Origin::Peer.persists() && !Origin::Peer.publishes());
        assert!(!Origin::Replay.persists() && !Origin::Replay.publishes());
    }

    #[test]
    fn identity_keys() {
        let identity = Identity {
            name: "edge".into(),
            version: "2".into(),
            previous_version: Some("1".into()),
            instance_id: "i".into(),
        };
        assert_eq!(identity.snapshot_key(), "edge-2");
        assert_eq!(identity.previous_key().as_deref(), Some("edge-1"));
    }

    #[test]
    fn error_statuses() {
        let route: GatewayError = RouteError::MissingField("path").into();
        assert_eq!(route.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GatewayError::RouteNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        let batch = GatewayError::batch(2, GatewayError::ProxyNotFound("p".into()));
        assert_eq!(batch.status(), StatusCode::NOT_FOUND);
        assert!(batch.to_string().starts_with("item 2:"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stored_snapshot_matches_state_after_concurrent_writes() {
        use crate::routing::RouteDefinition;
        use crate::store::{MemoryStore, Snapshot};

        let store = MemoryStore::new();
        let gw = Gateway::builder("gw", "1")
            .instance_id("node-a")
            .store(Arc::new(store.clone()))
            .build()
            .unwrap();

        let writers: Vec<_> = (0..32)
            .map(|i| {
                let gw = gw.clone();
                tokio::spawn(async move {
                    let def = RouteDefinition {
                        method: "GET".into(),
                        path: format!("/r{i}"),
                        resolve: format!("http://svc/r{i}"),
                        package_name: "pkg".into(),
                        ..Default::default()
                    };
                    gw.set_route(def, Origin::Local).await.unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let status = gw.flush().await;
        assert!(status.error.is_none());
        let stored = Snapshot::load(&store, "gw-1").await.unwrap().unwrap();
        assert_eq!(stored, gw.snapshot());
        assert_eq!(gw.routes().len(), 32);
    }
}
