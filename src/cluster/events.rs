//! Cluster event model.
//!
//! Route and proxy mutations share three topics; the payload variant says which
//! entry point replays it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::proxy::{PortForwardDefinition, ProxyDefinition};
use crate::routing::RouteDefinition;

pub const ROUTE_SET: &str = "route.set";
pub const ROUTE_REMOVE: &str = "route.remove";
pub const ROUTE_RESET: &str = "route.reset";

/// Topics every instance subscribes to.
pub const TOPICS: [&str; 3] = [ROUTE_SET, ROUTE_REMOVE, ROUTE_RESET];

/// Topic on which owners of `package` hear about a reset.
pub fn package_reset_topic(package: &str) -> String {
    format!("{ROUTE_RESET}.{package}")
}

/// A mutation as carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Routes(Vec<RouteDefinition>),
    RemoveRoute(String),
    Proxies(Vec<ProxyDefinition>),
    PortForwards(Vec<PortForwardDefinition>),
    RemoveProxy(String),
    Reset,
    /// Notification to a package's owners; never replayed by gateways.
    PackageReset(String),
}

impl EventPayload {
    pub fn topic(&self) -> String {
        match self {
            EventPayload::Routes(_) | EventPayload::Proxies(_) | EventPayload::PortForwards(_) => {
                ROUTE_SET.to_string()
            }
            EventPayload::RemoveRoute(_) | EventPayload::RemoveProxy(_) => {
                ROUTE_REMOVE.to_string()
            }
            EventPayload::Reset => ROUTE_RESET.to_string(),
            EventPayload::PackageReset(package) => package_reset_topic(package),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Routes(_) => "routes",
            EventPayload::RemoveRoute(_) => "remove_route",
            EventPayload::Proxies(_) => "proxies",
            EventPayload::PortForwards(_) => "port_forwards",
            EventPayload::RemoveProxy(_) => "remove_proxy",
            EventPayload::Reset => "reset",
            EventPayload::PackageReset(_) => "package_reset",
        }
    }
}

/// Envelope published on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEvent {
    /// Event identifier.
    pub id: String,
    /// Instance that performed the mutation.
    pub from_id: String,
    pub payload: EventPayload,
}

impl ClusterEvent {
    pub fn new(from_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_id: from_id.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_by_payload() {
        assert_eq!(EventPayload::Routes(vec![]).topic(), ROUTE_SET);
        assert_eq!(EventPayload::PortForwards(vec![]).topic(), ROUTE_SET);
        assert_eq!(EventPayload::RemoveProxy("p".into()).topic(), ROUTE_REMOVE);
        assert_eq!(EventPayload::Reset.topic(), ROUTE_RESET);
        assert_eq!(
            EventPayload::PackageReset("billing".into()).topic(),
            "route.reset.billing"
        );
    }

    #[test]
    fn wire_shape() {
        let event = ClusterEvent {
            id: "e1".into(),
            from_id: "node-a".into(),
            payload: EventPayload::RemoveRoute("r1".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["from_id"], "node-a");
        assert_eq!(json["payload"]["type"], "remove_route");
        assert_eq!(json["payload"]["data"], "r1");

        let reset: ClusterEvent =
            serde_json::from_str(r#"{"id":"e2","from_id":"b","payload":{"type":"reset"}}"#)
                .unwrap();
        assert_eq!(reset.payload, EventPayload::Reset);
    }

    #[test]
    fn new_events_get_unique_ids() {
        let a = ClusterEvent::new("n", EventPayload::Reset);
        let b = ClusterEvent::new("n", EventPayload::Reset);
        assert_ne!(a.id, b.id);
    }
}
