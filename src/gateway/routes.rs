//! Route mutation entry points.

use std::sync::Arc;

use crate::cluster::events::EventPayload;
use crate::gateway::{Gateway, GatewayError, Origin};
use crate::routing::{Route, RouteDefinition};

impl Gateway {
    /// Register or update a batch of REST routes in order.
    ///
    /// The batch stops at the first invalid item. Items before it stay applied and are
    /// covered by one snapshot write and one event; the error names the failed index.
    pub async fn set_routes(
        &self,
        defs: Vec<RouteDefinition>,
        origin: Origin,
    ) -> Result<Vec<String>, GatewayError> {
        let mut applied = Vec::with_capacity(defs.len());
        let mut failure = None;
        {
            let mut state = self.inner.state.write();
            for (index, def) in defs.iter().enumerate() {
                match state.upsert_route(def) {
                    Ok(route) => applied.push(route.definition()),
                    Err(e) => {
                        failure = Some(GatewayError::batch(index, e));
                        break;
                    }
                }
            }
        }

        let ids: Vec<String> = applied.iter().filter_map(|d| d.id.clone()).collect();
        tracing::debug!(
            origin = origin.as_str(),
            applied = ids.len(),
            requested = defs.len(),
            "Route batch applied"
        );
        if !applied.is_empty() {
            self.commit(origin, EventPayload::Routes(applied)).await;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(ids),
        }
    }

    /// Register or update one REST route. Returns its id.
    pub async fn set_route(
        &self,
        def: RouteDefinition,
        origin: Origin,
    ) -> Result<String, GatewayError> {
        let mut ids = self.set_routes(vec![def], origin).await.map_err(unbatch)?;
        Ok(ids.pop().unwrap_or_default())
    }

    /// Delete a route by id. Returns false if no such route exists.
    pub async fn delete_route(&self, id: &str, origin: Origin) -> bool {
        let removed = self.inner.state.write().delete_route(id);
        match removed {
            Some(_) => {
                self.commit(origin, EventPayload::RemoveRoute(id.to_string()))
                    .await;
                true
            }
            None => {
                tracing::debug!(route_id = %id, origin = origin.as_str(), "Delete of unknown route");
                false
            }
        }
    }

    /// Mount an in-process handler route. Never persisted or published.
    pub fn mount(&self, route: Route) -> Result<Arc<Route>, GatewayError> {
        Ok(self.inner.state.write().insert_route(route)?)
    }
}

/// A single-item batch reports the item's own error.
fn unbatch(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Batch { source, .. } => *source,
        other => other,
    }
}
