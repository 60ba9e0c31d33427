//! Routing state guarded by the gateway's reader/writer lock.
//!
//! # Responsibilities
//! - Own the per-method route trees, the id index, the proxy map and the package registry
//! - Keep the four consistent on every mutation
//! - Answer resolution queries for the request hot path
//!
//! # Design Decisions
//! - Every method here is synchronous and does no I/O, so the lock is never held
//!   across an await point
//! - A rejected registration restores the previous leaf before returning

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use serde::Serialize;
use uuid::Uuid;

use crate::package::PackageRegistry;
use crate::proxy::{Proxy, ProxyStatus};
use crate::routing::resolver::{self, Resolution};
use crate::routing::route::{parse_method, LeafKind, Route, RouteDefinition, RouteError};
use crate::routing::target::{self, Target};
use crate::routing::tree::{RouteTree, QUERY_KEY};
use crate::store::Snapshot;

/// Route listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    #[serde(flatten)]
    pub definition: RouteDefinition,
    pub leaf: LeafKind,
}

impl From<&Route> for RouteSummary {
    fn from(route: &Route) -> Self {
        Self {
            definition: route.definition(),
            leaf: route.leaf.kind(),
        }
    }
}

/// Routes, proxies and packages of one gateway.
#[derive(Debug)]
pub struct RoutingState {
    trees: HashMap<Method, RouteTree>,
    ids: HashMap<String, (Method, String)>,
    proxies: BTreeMap<String, Proxy>,
    packages: PackageRegistry,
}

impl RoutingState {
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            trees: HashMap::new(),
            ids: HashMap::new(),
            proxies: BTreeMap::new(),
            packages: PackageRegistry::new(gateway),
        }
    }

    /// Register or update a REST route from its definition.
    ///
    /// The id is taken from the definition, else from the leaf already registered at
    /// the same (method, path), else freshly generated.
    pub fn upsert_route(&mut self, def: &RouteDefinition) -> Result<Arc<Route>, RouteError> {
        let method = parse_method(&def.method)?;
        let id = match def.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self
                .trees
                .get(&method)
                .and_then(|tree| tree.get(&def.path))
                .map(|route| route.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        };
        let route = Route::from_definition(def, id)?;
        self.insert_route(route)
    }

    /// Insert a built route, replacing any leaf with the same id or the same
    /// (method, path).
    pub fn insert_route(&mut self, route: Route) -> Result<Arc<Route>, RouteError> {
        let route = Arc::new(route);

        // Same id registered elsewhere: detach the old leaf first so a changed path
        // does not stay resolvable.
        let moved = match self.ids.get(&route.id) {
            Some((method, path)) if *method != route.method || *path != route.path => {
                let (method, path) = (method.clone(), path.clone());
                self.remove_leaf(&method, &path)
            }
            _ => None,
        };

        let tree = self
            .trees
            .entry(route.method.clone())
            .or_insert_with(|| RouteTree::new(route.method.clone()));
        let replaced = match tree.insert(route.clone()) {
            Ok(replaced) => replaced,
            Err(e) => {
                if let Some(old) = moved {
                    self.restore_leaf(old);
                }
                return Err(e);
            }
        };

        let previous_package = moved
            .as_ref()
            .or(replaced.as_ref().filter(|r| r.id == route.id))
            .map(|r| r.package_name.clone());

        if let Some(displaced) = replaced.filter(|r| r.id != route.id) {
            tracing::debug!(
                route_id = %displaced.id,
                by = %route.id,
                method = %route.method,
                path = %route.path,
                "Route displaced"
            );
            self.ids.remove(&displaced.id);
            self.packages
                .remove_route(&displaced.id, &displaced.package_name);
        }

        self.ids
            .insert(route.id.clone(), (route.method.clone(), route.path.clone()));
        self.packages
            .assign_route(&route.id, previous_package.as_deref(), &route.package_name);

        tracing::debug!(
            route_id = %route.id,
            method = %route.method,
            path = %route.path,
            leaf = ?route.leaf.kind(),
            "Route registered"
        );
        Ok(route)
    }

    /// Delete the route with `id`.
    pub fn delete_route(&mut self, id: &str) -> Option<Arc<Route>> {
        let (method, path) = self.ids.remove(id)?;
        let removed = self.remove_leaf(&method, &path)?;
        self.packages.remove_route(&removed.id, &removed.package_name);
        tracing::debug!(route_id = %id, method = %method, path = %path, "Route deleted");
        Some(removed)
    }

    fn remove_leaf(&mut self, method: &Method, path: &str) -> Option<Arc<Route>> {
        let tree = self.trees.get_mut(method)?;
        let removed = tree.remove(path);
        if tree.is_empty() {
            self.trees.remove(method);
        }
        removed
    }

    fn restore_leaf(&mut self, route: Arc<Route>) {
        let tree = self
            .trees
            .entry(route.method.clone())
            .or_insert_with(|| RouteTree::new(route.method.clone()));
        if let Err(e) = tree.insert(route.clone()) {
            tracing::error!(route_id = %route.id, error = %e, "Failed to restore route");
        }
    }

    pub fn route(&self, id: &str) -> Option<Arc<Route>> {
        let (method, path) = self.ids.get(id)?;
        self.trees.get(method)?.get(path).cloned()
    }

    /// All routes, grouped by method in a stable order.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let mut trees: Vec<&RouteTree> = self.trees.values().collect();
        trees.sort_by(|a, b| a.method().as_str().cmp(b.method().as_str()));
        trees.into_iter().flat_map(RouteTree::routes).collect()
    }

    pub fn route_count(&self) -> usize {
        self.ids.len()
    }

    /// Total tree nodes across methods, roots included.
    pub fn node_count(&self) -> usize {
        self.trees.values().map(RouteTree::node_count).sum()
    }

    pub fn resolve(&self, method: &Method, target: &str) -> Option<Resolution> {
        resolver::resolve(&self.trees, method, target)
    }

    /// Decide where a request goes: route tree, then reverse proxies by longest
    /// prefix, then not-found.
    pub fn target(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Target {
        let query = query.filter(|q| !q.is_empty());
        let lookup = match query {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        };

        if let Some(resolution) = self.resolve(method, &lookup) {
            let captured_query = resolution.params.contains_key(QUERY_KEY);
            let mut target = target::build(Some(resolution), headers);
            if let (Target::Remote { url, .. }, Some(query), false) =
                (&mut target, query, captured_query)
            {
                url.push(if url.contains('?') { '&' } else { '?' });
                url.push_str(query);
            }
            return target;
        }

        if let Some(proxy) = self.reverse_proxy_for(path) {
            if let Some(url) = proxy.forward_url(path, query) {
                return Target::Remote {
                    route: None,
                    url,
                    headers: target::passthrough_headers(headers),
                };
            }
        }

        tracing::debug!(method = %method, path = %path, "Resolution miss");
        Target::NotFound
    }

    /// Reverse proxy with the longest listen path matching `path`.
    pub fn reverse_proxy_for(&self, path: &str) -> Option<&Proxy> {
        self.proxies
            .values()
            .filter_map(|proxy| proxy.prefix_len(path).map(|len| (len, proxy)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, proxy)| proxy)
    }

    pub fn proxy(&self, id: &str) -> Option<&Proxy> {
        self.proxies.get(id)
    }

    /// Id of the proxy registered under snapshot key `key`.
    pub fn proxy_id_for_key(&self, key: &str) -> Option<String> {
        self.proxies
            .values()
            .find(|proxy| proxy.key() == key)
            .map(|proxy| proxy.id.clone())
    }

    /// Insert or replace a proxy by id. Returns the replaced proxy.
    pub fn insert_proxy(&mut self, proxy: Proxy) -> Option<Proxy> {
        let previous = self.proxies.remove(&proxy.id);
        self.packages.assign_proxy(
            &proxy.id,
            previous.as_ref().map(|p| p.package_name.as_str()),
            &proxy.package_name,
        );
        tracing::debug!(proxy_id = %proxy.id, key = %proxy.key(), "Proxy registered");
        self.proxies.insert(proxy.id.clone(), proxy);
        previous
    }

    pub fn remove_proxy(&mut self, id: &str) -> Option<Proxy> {
        let removed = self.proxies.remove(id)?;
        self.packages.remove_proxy(&removed.id, &removed.package_name);
        tracing::debug!(proxy_id = %id, "Proxy deleted");
        Some(removed)
    }

    pub fn proxies(&self) -> impl Iterator<Item = &Proxy> {
        self.proxies.values()
    }

    pub fn proxy_statuses(&self) -> Vec<ProxyStatus> {
        self.proxies.values().map(Proxy::status).collect()
    }

    pub fn packages(&self) -> &PackageRegistry {
        &self.packages
    }

    /// Drop everything. Returns the removed proxies so port-forwards can be stopped.
    pub fn clear(&mut self) -> Vec<Proxy> {
        self.trees.clear();
        self.ids.clear();
        self.packages.clear();
        std::mem::take(&mut self.proxies).into_values().collect()
    }

    pub fn snapshot(&self, version: &str) -> Snapshot {
        let mut trees: Vec<&RouteTree> = self.trees.values().collect();
        trees.sort_by(|a, b| a.method().as_str().cmp(b.method().as_str()));
        Snapshot {
            router: trees.into_iter().map(RouteTree::record).collect(),
            proxy: self
                .proxies
                .values()
                .map(|proxy| (proxy.key(), proxy.record()))
                .collect(),
            version: version.to_string(),
        }
    }
}
