//! Proxy mutation entry points and reset.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::cluster::events::EventPayload;
use crate::gateway::{Gateway, GatewayError, Origin, RoutingState};
use crate::proxy::{
    normalize_prefix, PortForward, PortForwardDefinition, Proxy, ProxyDefinition, ProxyError,
};

impl Gateway {
    /// Register or update a batch of reverse proxies. Same batch rules as
    /// [`Gateway::set_routes`].
    pub async fn set_proxies(
        &self,
        defs: Vec<ProxyDefinition>,
        origin: Origin,
    ) -> Result<Vec<String>, GatewayError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let mut applied = Vec::with_capacity(defs.len());
        let mut stale = Vec::new();
        let mut failure = None;
        {
            let mut state = self.inner.state.write();
            for (index, def) in defs.iter().enumerate() {
                let id = explicit_id(def.id.as_deref())
                    .or_else(|| state.proxy_id_for_key(&normalize_prefix(&def.path)))
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                match Proxy::reverse(def, id.clone()).and_then(|proxy| unclaimed(&state, proxy)) {
                    Ok(proxy) => {
                        if let Some(previous) = state.insert_proxy(proxy) {
                            stale.extend(previous.port_forward_handle().cloned());
                        }
                        applied.push(ProxyDefinition {
                            id: Some(id),
                            ..def.clone()
                        });
                    }
                    Err(e) => {
                        failure = Some(GatewayError::batch(index, e));
                        break;
                    }
                }
            }
        }

        // A port-forward replaced by a reverse proxy under the same id.
        for forward in stale {
            forward.stop().await;
        }

        let ids: Vec<String> = applied.iter().filter_map(|d| d.id.clone()).collect();
        if !applied.is_empty() {
            self.commit(origin, EventPayload::Proxies(applied)).await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(ids),
        }
    }

    /// Register or update a batch of port-forwards and start their listeners.
    ///
    /// An unchanged endpoint keeps its running listener. A bind failure leaves the
    /// proxy registered but stopped, ends the batch, and is reported as
    /// [`ProxyError::Bind`].
    pub async fn set_port_forwards(
        &self,
        defs: Vec<PortForwardDefinition>,
        origin: Origin,
    ) -> Result<Vec<String>, GatewayError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let mut applied = Vec::with_capacity(defs.len());
        let mut failure = None;

        for (index, def) in defs.iter().enumerate() {
            let staged = match self.stage_port_forward(def) {
                Ok(staged) => staged,
                Err(e) => {
                    failure = Some(GatewayError::batch(index, e));
                    break;
                }
            };
            applied.push(PortForwardDefinition {
                id: Some(staged.id.clone()),
                ..def.clone()
            });

            // The replaced listener must release its port before the new one binds.
            if let Some(old) = staged.replaced {
                old.stop().await;
            }
            if let Err(source) = staged.forward.start().await {
                tracing::warn!(proxy_id = %staged.id, error = %source, "Port-forward left stopped");
                failure = Some(GatewayError::batch(
                    index,
                    ProxyError::Bind {
                        id: staged.id,
                        source,
                    },
                ));
                break;
            }
        }

        let ids: Vec<String> = applied.iter().filter_map(|d| d.id.clone()).collect();
        if !applied.is_empty() {
            self.commit(origin, EventPayload::PortForwards(applied)).await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(ids),
        }
    }

    /// Put a port-forward definition into the state. A running listener is kept when
    /// its endpoint is unchanged.
    fn stage_port_forward(&self, def: &PortForwardDefinition) -> Result<Staged, ProxyError> {
        let mut state = self.inner.state.write();
        let id = explicit_id(def.id.as_deref())
            .or_else(|| state.proxy_id_for_key(&format!(":{}", def.local_port)))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let current = state
            .proxy(&id)
            .and_then(|existing| existing.port_forward_handle())
            .cloned();
        let kept = current
            .as_ref()
            .filter(|existing| *existing.endpoint() == def.endpoint())
            .cloned();

        let forward = match kept {
            Some(existing) => existing,
            None => Arc::new(PortForward::new(
                id.clone(),
                def.endpoint(),
                self.inner.port_forward.clone(),
            )),
        };
        let proxy = unclaimed(&state, Proxy::over_listener(def, forward.clone())?)?;
        let replaced = current.filter(|old| !Arc::ptr_eq(old, &forward));
        state.insert_proxy(proxy);

        Ok(Staged {
            id,
            forward,
            replaced,
        })
    }

    /// Delete a proxy by id, stopping its listener first if it is a port-forward.
    pub async fn delete_proxy(&self, id: &str, origin: Origin) -> bool {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let removed = self.inner.state.write().remove_proxy(id);
        let Some(proxy) = removed else {
            tracing::debug!(proxy_id = %id, origin = origin.as_str(), "Delete of unknown proxy");
            return false;
        };
        if let Some(forward) = proxy.port_forward_handle() {
            forward.stop().await;
        }
        self.commit(origin, EventPayload::RemoveProxy(id.to_string()))
            .await;
        true
    }

    /// Drop every route, proxy and package, stop all port-forwards and remount the
    /// management routes. A local reset also notifies each dropped package's owners.
    pub async fn reset(&self, origin: Origin) -> Result<(), GatewayError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let (removed, packages) = {
            let mut state = self.inner.state.write();
            let packages: BTreeSet<String> = state.packages().names().into_iter().collect();
            (state.clear(), packages)
        };

        for proxy in &removed {
            if let Some(forward) = proxy.port_forward_handle() {
                forward.stop().await;
            }
        }
        crate::admin::mount_management(self)?;

        tracing::info!(
            origin = origin.as_str(),
            proxies = removed.len(),
            packages = packages.len(),
            "Gateway reset"
        );
        self.commit(origin, EventPayload::Reset).await;

        if origin.publishes() {
            for package in packages
                .into_iter()
                .filter(|p| p != crate::admin::MANAGEMENT_PACKAGE)
            {
                self.publish(EventPayload::PackageReset(package)).await;
            }
        }
        Ok(())
    }
}

struct Staged {
    id: String,
    forward: Arc<PortForward>,
    replaced: Option<Arc<PortForward>>,
}

/// Fail when another proxy already owns `proxy`'s snapshot key.
fn unclaimed(state: &RoutingState, proxy: Proxy) -> Result<Proxy, ProxyError> {
    let key = proxy.key();
    match state.proxy_id_for_key(&key) {
        Some(owner) if owner != proxy.id => Err(ProxyError::DuplicateKey { key, owner }),
        _ => Ok(proxy),
    }
}

fn explicit_id(id: Option<&str>) -> Option<String> {
    id.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
