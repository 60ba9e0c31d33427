//! Startup: load the current snapshot or migrate the previous version's.

use chrono::Utc;

use crate::gateway::{Gateway, GatewayError, Origin};
use crate::proxy::{ProxyEntry, ProxyError};
use crate::store::{backup_key, Snapshot};

/// How a gateway got its initial state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bootstrap {
    /// Replayed the snapshot stored under the current version.
    Loaded { routes: usize, proxies: usize },
    /// Replayed the previous version's snapshot and saved it under the current one.
    Migrated {
        from: String,
        backup: String,
        routes: usize,
        proxies: usize,
    },
    /// No snapshot found.
    Empty,
}

impl Gateway {
    /// Load persisted state, then mount the management routes.
    ///
    /// Replay never publishes. Items that fail to replay are logged and skipped so one
    /// bad record cannot keep the gateway from starting.
    pub async fn bootstrap(&self) -> Result<Bootstrap, GatewayError> {
        let current_key = self.identity().snapshot_key();
        let store = self.store().clone();

        let outcome = if let Some(snapshot) = Snapshot::load(store.as_ref(), &current_key).await? {
            let (routes, proxies) = self.replay(snapshot).await;
            Bootstrap::Loaded { routes, proxies }
        } else if let Some(previous_key) = self.identity().previous_key() {
            match store.get(&previous_key).await? {
                Some(raw) => {
                    let snapshot = Snapshot::from_json(&previous_key, &raw)?;
                    let (routes, proxies) = self.replay(snapshot).await;

                    let backup = backup_key(&previous_key, Utc::now());
                    store
                        .set(&backup, raw, Some(self.inner.backup_ttl))
                        .await?;
                    let migrated = self.snapshot();
                    store
                        .set(&current_key, migrated.to_json(&current_key)?, None)
                        .await?;

                    tracing::info!(
                        from = %previous_key,
                        to = %current_key,
                        backup = %backup,
                        routes,
                        proxies,
                        "Snapshot migrated"
                    );
                    Bootstrap::Migrated {
                        from: previous_key,
                        backup,
                        routes,
                        proxies,
                    }
                }
                None => Bootstrap::Empty,
            }
        } else {
            Bootstrap::Empty
        };

        crate::admin::mount_management(self)?;
        tracing::info!(key = %current_key, outcome = ?outcome, "Gateway bootstrapped");
        Ok(outcome)
    }

    /// Replay a snapshot item by item. Returns how many routes and proxies applied.
    async fn replay(&self, snapshot: Snapshot) -> (usize, usize) {
        let mut routes = 0;
        for def in snapshot.routes() {
            let path = def.path.clone();
            match self.set_route(def, Origin::Replay).await {
                Ok(_) => routes += 1,
                Err(e) => tracing::warn!(path = %path, error = %e, "Skipping persisted route"),
            }
        }

        let mut proxies = 0;
        for entry in snapshot.proxies() {
            let result = match entry {
                ProxyEntry::Reverse(def) => self.set_proxies(vec![def], Origin::Replay).await,
                ProxyEntry::PortForward(def) => {
                    self.set_port_forwards(vec![def], Origin::Replay).await
                }
            };
            match result {
                Ok(_) => proxies += 1,
                // A port-forward that cannot bind is still registered.
                Err(e) => {
                    if is_bind_failure(&e) {
                        proxies += 1;
                    }
                    tracing::warn!(error = %e, "Persisted proxy not fully restored");
                }
            }
        }
        (routes, proxies)
    }
}

fn is_bind_failure(err: &GatewayError) -> bool {
    match err {
        GatewayError::Batch { source, .. } => is_bind_failure(source),
        GatewayError::Proxy(ProxyError::Bind { .. }) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyDefinition;
    use crate::routing::RouteDefinition;
    use crate::store::{KeyValueStore, MemoryStore};
    use axum::http::{HeaderMap, Method};
    use std::sync::Arc;
    use std::time::Duration;

    fn def(path: &str) -> RouteDefinition {
        RouteDefinition {
            method: "GET".into(),
            path: path.into(),
            resolve: format!("http://svc{path}"),
            package_name: "pkg".into(),
            ..Default::default()
        }
    }

    fn builder(store: &MemoryStore, version: &str) -> crate::gateway::GatewayBuilder {
        Gateway::builder("gw", version)
            .store(Arc::new(store.clone()))
            .admin_base("/admin")
            .backup_ttl(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn empty_store_mounts_management_only() {
        let store = MemoryStore::new();
        let gw = builder(&store, "1").build().unwrap();
        assert_eq!(gw.bootstrap().await.unwrap(), Bootstrap::Empty);

        let target = gw.target(&Method::GET, "/admin/version", None, &HeaderMap::new());
        assert_eq!(target.label(), "handler");
        assert!(gw.snapshot().routes().is_empty());
    }

    #[tokio::test]
    async fn restart_reloads_current_snapshot() {
        let store = MemoryStore::new();
        let first = builder(&store, "1").build().unwrap();
        first.bootstrap().await.unwrap();
        let id = first.set_route(def("/a"), Origin::Local).await.unwrap();
        first
            .set_proxies(
                vec![ProxyDefinition {
                    path: "/api".into(),
                    target: "http://backend".into(),
                    package_name: "pkg".into(),
                    ..Default::default()
                }],
                Origin::Local,
            )
            .await
            .unwrap();
        first.flush().await;

        let second = builder(&store, "1").build().unwrap();
        assert_eq!(
            second.bootstrap().await.unwrap(),
            Bootstrap::Loaded {
                routes: 1,
                proxies: 1
            }
        );
        assert!(second.route(&id).is_some());
        assert_eq!(second.proxies().len(), 1);
    }

    #[tokio::test]
    async fn previous_version_is_migrated_with_backup() {
        let store = MemoryStore::new();
        let old = builder(&store, "1").build().unwrap();
        old.set_routes(vec![def("/a"), def("/b/{id}")], Origin::Local)
            .await
            .unwrap();
        old.flush().await;
        let old_routes = old.snapshot().routes();

        let new = builder(&store, "2").previous_version("1").build().unwrap();
        let outcome = new.bootstrap().await.unwrap();
        let (from, backup, routes) = match outcome {
            Bootstrap::Migrated {
                from,
                backup,
                routes,
                ..
            } => (from, backup, routes),
            other => panic!("expected migration, got {other:?}"),
        };
        assert_eq!(from, "gw-1");
        assert_eq!(routes, 2);
        assert!(backup.starts_with("gw-1-backup-"));
        assert_eq!(store.ttl(&backup).map(|t| t.as_secs() <= 60), Some(true));

        let migrated = Snapshot::load(&store, "gw-2").await.unwrap().unwrap();
        assert_eq!(migrated.routes(), old_routes);
        assert!(store.exists("gw-1").await.unwrap());
    }

    #[tokio::test]
    async fn current_snapshot_wins_over_previous() {
        let store = MemoryStore::new();
        let old = builder(&store, "1").build().unwrap();
        old.set_route(def("/old"), Origin::Local).await.unwrap();
        old.flush().await;
        let current = builder(&store, "2").build().unwrap();
        current.set_route(def("/new"), Origin::Local).await.unwrap();
        current.flush().await;

        let gw = builder(&store, "2").previous_version("1").build().unwrap();
        assert!(matches!(
            gw.bootstrap().await.unwrap(),
            Bootstrap::Loaded { routes: 1, .. }
        ));
        let paths: Vec<String> = gw.snapshot().routes().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/new".to_string()]);
    }

    #[tokio::test]
    async fn bad_record_is_skipped() {
        let store = MemoryStore::new();
        let raw = r#"{"router":[],"proxy":{"/x":{"id":"p","kind":"reverse_proxy","path":"/x","target":"nope","package_name":"pkg"}},"version":"1"}"#;
        store.set("gw-1", raw.to_string(), None).await.unwrap();

        let gw = builder(&store, "1").build().unwrap();
        assert_eq!(
            gw.bootstrap().await.unwrap(),
            Bootstrap::Loaded {
                routes: 0,
                proxies: 0
            }
        );
        assert!(gw.proxies().is_empty());
    }
}
