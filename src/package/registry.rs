//! Package registry.
//!
//! # Responsibilities
//! - Track which routes and proxies belong to which package
//! - Move members between packages on reassignment
//! - Drop packages that no longer have members

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// A named group of routes and proxies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Package {
    /// `{gateway}-{package}`.
    pub id: String,
    pub name: String,
    pub routes: BTreeSet<String>,
    pub proxies: BTreeSet<String>,
}

impl Package {
    fn new(gateway: &str, name: &str) -> Self {
        Self {
            id: format!("{gateway}-{name}"),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.proxies.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Member {
    Route,
    Proxy,
}

/// Registry of packages for one gateway instance.
#[derive(Debug, Clone, Default)]
pub struct PackageRegistry {
    gateway: String,
    packages: BTreeMap<String, Package>,
}

impl PackageRegistry {
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
            packages: BTreeMap::new(),
        }
    }

    /// Put route `id` in `package`, removing it from `previous` if that differs.
    pub fn assign_route(&mut self, id: &str, previous: Option<&str>, package: &str) {
        self.assign(Member::Route, id, previous, package);
    }

    pub fn remove_route(&mut self, id: &str, package: &str) {
        self.remove(Member::Route, id, package);
    }

    /// Put proxy `id` in `package`, removing it from `previous` if that differs.
    pub fn assign_proxy(&mut self, id: &str, previous: Option<&str>, package: &str) {
        self.assign(Member::Proxy, id, previous, package);
    }

    pub fn remove_proxy(&mut self, id: &str, package: &str) {
        self.remove(Member::Proxy, id, package);
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn clear(&mut self) {
        self.packages.clear();
    }

    fn assign(&mut self, member: Member, id: &str, previous: Option<&str>, package: &str) {
        if let Some(previous) = previous.filter(|p| *p != package) {
            self.remove(member, id, previous);
        }
        let entry = self
            .packages
            .entry(package.to_string())
            .or_insert_with(|| Package::new(&self.gateway, package));
        members_mut(entry, member).insert(id.to_string());
    }

    fn remove(&mut self, member: Member, id: &str, package: &str) {
        let Some(entry) = self.packages.get_mut(package) else {
            return;
        };
        members_mut(entry, member).remove(id);
        if entry.is_empty() {
            self.packages.remove(package);
            tracing::debug!(package = %package, "Removed empty package");
        }
    }
}

fn members_mut(package: &mut Package, member: Member) -> &mut BTreeSet<String> {
    match member {
        Member::Route => &mut package.routes,
        Member::Proxy => &mut package.proxies,
    }
}
