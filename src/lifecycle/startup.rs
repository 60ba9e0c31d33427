//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the configured snapshot store
//! - Build and bootstrap the gateway
//! - Subscribe to peer events before traffic is accepted
//! - Bind the HTTP listener last
//!
//! # Design Decisions
//! - Subsystems initialize in order, not concurrently
//! - Any startup error is fatal

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::cluster::{BusError, ClusterSync, EventBus, LocalBus, NoopBus};
use crate::config::{GatewayConfig, StoreConfig, StoreKind};
use crate::gateway::{Gateway, GatewayBuilder, GatewayError};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::store::{FileStore, KeyValueStore, MemoryStore, StoreError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("cluster subscription failed: {0}")]
    Bus(#[from] BusError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Open the store named by `config`.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::File => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| StoreError::Backend("file store requires `store.path`".into()))?;
            Ok(Arc::new(FileStore::open(path).await?))
        }
    }
}

/// A bootstrapped gateway with its bound listener, ready to serve.
pub struct App {
    gateway: Gateway,
    server: HttpServer,
    listener: TcpListener,
    sync: Option<ClusterSync>,
    shutdown: Shutdown,
}

/// Start with the bus implied by `config.cluster`: an in-process [`LocalBus`] when
/// enabled, otherwise none.
pub async fn start(config: GatewayConfig) -> Result<App, StartupError> {
    let bus: Option<Arc<dyn EventBus>> = if config.cluster.enabled {
        Some(Arc::new(LocalBus::default()))
    } else {
        None
    };
    start_with_bus(config, bus).await
}

/// Start with an explicit bus. `None` disables cluster sync.
pub async fn start_with_bus(
    config: GatewayConfig,
    bus: Option<Arc<dyn EventBus>>,
) -> Result<App, StartupError> {
    let store = open_store(&config.store).await?;
    tracing::info!(kind = ?config.store.kind, "Snapshot store opened");

    let mut builder = GatewayBuilder::from_config(&config).store(store);
    if let Some(bus) = &bus {
        builder = builder.bus(bus.clone());
    } else {
        builder = builder.bus(Arc::new(NoopBus));
    }
    let gateway = builder.build()?;
    let outcome = gateway.bootstrap().await?;
    tracing::info!(
        gateway = %gateway.identity().name,
        version = %gateway.identity().version,
        instance_id = %gateway.instance_id(),
        outcome = ?outcome,
        "Gateway ready"
    );

    let sync = match bus {
        Some(_) => Some(ClusterSync::subscribe(gateway.clone()).await?),
        None => None,
    };

    let addr = config.listener.bind_address.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    Ok(App {
        server: HttpServer::new(gateway.clone(), &config),
        gateway,
        listener,
        sync,
        shutdown: Shutdown::new(),
    })
}

impl App {
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Handle that stops [`App::run`] when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Serve until `signal` resolves or the shutdown handle fires, then drain requests,
    /// stop the subscriber, stop every port-forward and flush snapshot writes.
    pub async fn run<F>(self, signal: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let App {
            gateway,
            server,
            listener,
            sync,
            shutdown,
        } = self;

        let subscriber = sync.map(|sync| tokio::spawn(sync.run(shutdown.clone())));

        let stop = shutdown.clone();
        let served = server
            .run(listener, async move {
                tokio::select! {
                    _ = signal => {}
                    _ = stop.wait() => {}
                }
                stop.trigger();
            })
            .await;

        shutdown.trigger();
        if let Some(handle) = subscriber {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Cluster sync task failed");
            }
        }
        gateway.shutdown().await;
        tracing::info!("Shutdown complete");
        served.map_err(StartupError::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "127.0.0.1:0".into();
        config
    }

    #[tokio::test]
    async fn file_store_needs_path() {
        let store = StoreConfig {
            kind: StoreKind::File,
            path: None,
            ..Default::default()
        };
        assert!(matches!(
            open_store(&store).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn serves_until_shutdown() {
        let app = start(config()).await.unwrap();
        let addr = app.local_addr().unwrap();
        let shutdown = app.shutdown_handle();
        let running = tokio::spawn(app.run(std::future::pending()));

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/version"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["name"], "gateway");

        shutdown.trigger();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn trigger_before_run_still_stops() {
        let app = start(config()).await.unwrap();
        app.shutdown_handle().trigger();
        tokio::time::timeout(
            std::time::Duration::from_secs(3),
            app.run(std::future::pending()),
        )
        .await
        .expect("run ignored an earlier shutdown")
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_with_cluster_subscriber() {
        let bus: Arc<dyn EventBus> = Arc::new(LocalBus::default());
        let app = start_with_bus(config(), Some(bus.clone())).await.unwrap();
        let gateway = app.gateway().clone();
        let shutdown = app.shutdown_handle();
        let running = tokio::spawn(app.run(std::future::pending()));

        let event = crate::cluster::ClusterEvent::new(
            "peer",
            crate::cluster::EventPayload::Routes(vec![crate::routing::RouteDefinition {
                method: "GET".into(),
                path: "/from-peer".into(),
                resolve: "http://svc/from-peer".into(),
                package_name: "pkg".into(),
                ..Default::default()
            }]),
        );
        bus.publish(
            crate::cluster::events::ROUTE_SET,
            serde_json::to_string(&event).unwrap(),
        )
        .await
        .unwrap();

        let mut applied = false;
        for _ in 0..100 {
            if gateway.routes().iter().any(|r| r.definition.path == "/from-peer") {
                applied = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(applied, "peer route never applied");

        shutdown.trigger();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config();
        config.listener.bind_address = taken.local_addr().unwrap().to_string();
        assert!(matches!(
            start(config).await,
            Err(StartupError::Bind { .. })
        ));
    }
}
