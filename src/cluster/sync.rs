//! Replays peer mutations received from the event bus.
//!
//! # Responsibilities
//! - Subscribe to the route topics before any traffic is served
//! - Drop events this instance published itself
//! - Apply everything else through the gateway's entry points as [`Origin::Peer`]

use futures_util::stream::{self, BoxStream, StreamExt};

use crate::cluster::bus::BusError;
use crate::cluster::events::{ClusterEvent, EventPayload, TOPICS};
use crate::gateway::{Gateway, Origin};
use crate::lifecycle::Shutdown;

/// What happened to one received event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied,
    /// Published by this instance.
    Echo,
    /// Could not be decoded.
    Malformed,
    /// Decoded but the mutation failed.
    Rejected,
    /// Not meant for gateways.
    Ignored,
}

impl SyncOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOutcome::Applied => "applied",
            SyncOutcome::Echo => "echo",
            SyncOutcome::Malformed => "malformed",
            SyncOutcome::Rejected => "rejected",
            SyncOutcome::Ignored => "ignored",
        }
    }
}

/// Subscriber loop for one gateway.
pub struct ClusterSync {
    gateway: Gateway,
    events: BoxStream<'static, (&'static str, String)>,
}

impl ClusterSync {
    /// Subscribe to every route topic on the gateway's bus.
    pub async fn subscribe(gateway: Gateway) -> Result<Self, BusError> {
        let mut streams = Vec::with_capacity(TOPICS.len());
        for topic in TOPICS {
            let events = gateway.bus().subscribe(topic).await?;
            streams.push(events.map(move |raw| (topic, raw)).boxed());
        }
        tracing::info!(
            instance_id = %gateway.instance_id(),
            topics = ?TOPICS,
            "Cluster sync subscribed"
        );
        Ok(Self {
            gateway,
            events: stream::select_all(streams).boxed(),
        })
    }

    /// Handle events until the bus closes or shutdown fires.
    pub async fn run(self, shutdown: Shutdown) {
        let ClusterSync {
            gateway,
            mut events,
        } = self;
        loop {
            tokio::select! {
                next = events.next() => match next {
                    Some((topic, raw)) => {
                        handle_event(&gateway, topic, &raw).await;
                    }
                    None => {
                        tracing::warn!("Event bus closed; cluster sync stopping");
                        break;
                    }
                },
                _ = shutdown.wait() => {
                    tracing::info!("Cluster sync received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Decode and apply one raw event. Never fails; the outcome is logged and counted.
    pub async fn handle(&self, topic: &str, raw: &str) -> SyncOutcome {
        handle_event(&self.gateway, topic, raw).await
    }
}

async fn handle_event(gateway: &Gateway, topic: &str, raw: &str) -> SyncOutcome {
    let outcome = match serde_json::from_str::<ClusterEvent>(raw) {
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Discarding malformed cluster event");
            SyncOutcome::Malformed
        }
        Ok(event) if event.from_id == gateway.instance_id() => {
            tracing::debug!(topic = %topic, event_id = %event.id, "Ignoring own event");
            SyncOutcome::Echo
        }
        Ok(event) => apply(gateway, topic, event).await,
    };
    metrics::counter!(
        "gateway_cluster_events_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    outcome
}

async fn apply(gateway: &Gateway, topic: &str, event: ClusterEvent) -> SyncOutcome {
    let kind = event.payload.kind();
    let result = match event.payload {
        EventPayload::Routes(defs) => gateway.set_routes(defs, Origin::Peer).await.map(drop),
        EventPayload::RemoveRoute(id) => {
            gateway.delete_route(&id, Origin::Peer).await;
            Ok(())
        }
        EventPayload::Proxies(defs) => gateway.set_proxies(defs, Origin::Peer).await.map(drop),
        EventPayload::PortForwards(defs) => gateway
            .set_port_forwards(defs, Origin::Peer)
            .await
            .map(drop),
        EventPayload::RemoveProxy(id) => {
            gateway.delete_proxy(&id, Origin::Peer).await;
            Ok(())
        }
        EventPayload::Reset => gateway.reset(Origin::Peer).await,
        EventPayload::PackageReset(_) => return SyncOutcome::Ignored,
    };

    match result {
        Ok(()) => {
            tracing::debug!(
                topic = %topic,
                kind,
                from_id = %event.from_id,
                event_id = %event.id,
                "Applied peer event"
            );
            SyncOutcome::Applied
        }
        Err(e) => {
            tracing::warn!(
                topic = %topic,
                kind,
                from_id = %event.from_id,
                error = %e,
                "Peer event rejected"
            );
            SyncOutcome::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::bus::LocalBus;
    use crate::cluster::events::ROUTE_SET;
    use crate::routing::RouteDefinition;
    use std::sync::Arc;
    use std::time::Duration;

    fn gateway(bus: &LocalBus, instance: &str) -> Gateway {
        Gateway::builder("gw", "1")
            .instance_id(instance)
            .bus(Arc::new(bus.clone()))
            .build()
            .unwrap()
    }

    fn def(path: &str) -> RouteDefinition {
        RouteDefinition {
            method: "GET".into(),
            path: path.into(),
            resolve: format!("http://svc{path}"),
            package_name: "pkg".into(),
            ..Default::default()
        }
    }

    fn encoded(from: &str, payload: EventPayload) -> String {
        serde_json::to_string(&ClusterEvent::new(from, payload)).unwrap()
    }

    #[tokio::test]
    async fn handle_classifies_events() {
        let bus = LocalBus::default();
        let gw = gateway(&bus, "a");
        let sync = ClusterSync::subscribe(gw.clone()).await.unwrap();

        assert_eq!(sync.handle(ROUTE_SET, "{not json").await, SyncOutcome::Malformed);
        assert_eq!(
            sync.handle(ROUTE_SET, &encoded("a", EventPayload::Routes(vec![def("/x")])))
                .await,
            SyncOutcome::Echo
        );
        assert!(gw.routes().is_empty());

        assert_eq!(
            sync.handle(ROUTE_SET, &encoded("b", EventPayload::Routes(vec![def("/x")])))
                .await,
            SyncOutcome::Applied
        );
        assert_eq!(gw.routes().len(), 1);

        let mut bad = def("/y");
        bad.method = "BREW".into();
        assert_eq!(
            sync.handle(ROUTE_SET, &encoded("b", EventPayload::Routes(vec![bad])))
                .await,
            SyncOutcome::Rejected
        );
        assert_eq!(
            sync.handle("route.reset.pkg", &encoded("b", EventPayload::PackageReset("pkg".into())))
                .await,
            SyncOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn peers_converge_without_echo_loops() {
        let bus = LocalBus::default();
        let a = gateway(&bus, "a");
        let b = gateway(&bus, "b");
        let shutdown = Shutdown::new();
        let mut tasks = Vec::new();
        for gw in [&a, &b] {
            let sync = ClusterSync::subscribe(gw.clone()).await.unwrap();
            tasks.push(tokio::spawn(sync.run(shutdown.clone())));
        }

        let id = a.set_route(def("/shared"), Origin::Local).await.unwrap();
        let mut synced = false;
        for _ in 0..50 {
            if b.route(&id).is_some() {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced, "peer never received the route");

        assert!(a.delete_route(&id, Origin::Local).await);
        for _ in 0..50 {
            if b.route(&id).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(b.route(&id).is_none());

        shutdown.trigger();
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
