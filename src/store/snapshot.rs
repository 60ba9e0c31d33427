//! Persisted snapshot model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proxy::{ProxyEntry, ProxyRecord};
use crate::routing::{NodeRecord, RouteDefinition};
use crate::store::{KeyValueStore, StoreError};

/// Everything needed to rebuild a gateway's routes and proxies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// One tree per method.
    #[serde(default)]
    pub router: Vec<NodeRecord>,
    /// Proxies keyed by listen path (`:{port}` for port-forwards).
    #[serde(default)]
    pub proxy: BTreeMap<String, ProxyRecord>,
    #[serde(default)]
    pub version: String,
}

impl Snapshot {
    /// REST route definitions in tree order.
    pub fn routes(&self) -> Vec<RouteDefinition> {
        self.router.iter().flat_map(NodeRecord::definitions).collect()
    }

    pub fn proxies(&self) -> Vec<ProxyEntry> {
        self.proxy.values().cloned().map(ProxyRecord::into_entry).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes().is_empty() && self.proxy.is_empty()
    }

    pub fn to_json(&self, key: &str) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    pub fn from_json(key: &str, raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })
    }

    /// Load the snapshot stored under `key`.
    pub async fn load(store: &dyn KeyValueStore, key: &str) -> Result<Option<Self>, StoreError> {
        match store.get(key).await? {
            Some(raw) => Self::from_json(key, &raw).map(Some),
            None => Ok(None),
        }
    }
}

/// Store key for a gateway version: `{name}-{version}`.
pub fn snapshot_key(name: &str, version: &str) -> String {
    format!("{name}-{version}")
}

/// Key for a timed backup of `key` taken at `at`.
pub fn backup_key(key: &str, at: DateTime<Utc>) -> String {
    format!("{key}-backup-{}", at.format("%Y%m%dT%H%M%SZ"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    #[test]
    fn keys() {
        assert_eq!(snapshot_key("edge", "2.1"), "edge-2.1");
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(backup_key("edge-2.0", at), "edge-2.0-backup-20240305T070809Z");
    }

    #[tokio::test]
    async fn load_missing_and_present() {
        let store = MemoryStore::new();
        assert!(Snapshot::load(&store, "k").await.unwrap().is_none());

        let snapshot = Snapshot {
            version: "1".into(),
            ..Default::default()
        };
        store
            .set("k", snapshot.to_json("k").unwrap(), None)
            .await
            .unwrap();
        let loaded = Snapshot::load(&store, "k").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(loaded.is_empty());
    }

    #[test]
    fn parses_wire_shape() {
        let raw = r#"{
            "router": [{
                "method": "GET", "tag": "", "param": "literal",
                "routes": [{
                    "id": "r1", "method": "GET", "tag": "users", "param": "literal",
                    "leaf": "rest", "resolve": "http://svc/users", "path": "/users",
                    "header": {"x-a": "1"}, "tp_header": "join", "exclude_header": ["cookie"],
                    "private": true, "package_name": "accounts", "routes": []
                }]
            }],
            "proxy": {
                "/api": {"id": "p1", "name": "api", "description": "", "kind": "reverse_proxy",
                         "path": "/api", "target": "http://svc", "package_name": "accounts"}
            },
            "version": "1.0"
        }"#;
        let snapshot = Snapshot::from_json("k", raw).unwrap();
        let routes = snapshot.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id.as_deref(), Some("r1"));
        assert!(routes[0].private);
        assert_eq!(snapshot.proxies().len(), 1);
    }
}
