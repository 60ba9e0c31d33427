//! Route leaf data and registration input.
//!
//! A [`Route`] is the payload carried by a leaf node of a [`RouteTree`](super::tree::RouteTree).
//! It is built from a [`RouteDefinition`] (the management API / event payload shape) or
//! directly for built-in handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use axum::response::Response;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Methods a route may be registered for.
pub const SUPPORTED_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

/// A handler served by the gateway process itself.
///
/// Dispatch inserts the owning [`Gateway`](crate::gateway::Gateway) and the request's
/// [`PathValues`](super::resolver::PathValues) into the request extensions before calling it.
pub type LocalHandler = Arc<dyn Fn(Request<Body>) -> BoxFuture<'static, Response> + Send + Sync>;

/// Wrap an async function as a [`LocalHandler`].
pub fn local_handler<F, Fut>(f: F) -> LocalHandler
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// Registration errors. A failed registration never mutates the tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unsupported HTTP method `{0}`")]
    UnsupportedMethod(String),

    #[error("path `{0}` must start with '/'")]
    InvalidPath(String),

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("segment `{segment}` of `{path}` conflicts with existing parameter `{existing}`")]
    ParamConflict {
        path: String,
        segment: String,
        existing: String,
    },

    #[error("segment `{segment}` of `{path}` must be the last segment")]
    NonTerminalParam { path: String, segment: String },
}

/// How inbound headers combine with a route's static headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeaderPolicy {
    /// Only the static headers are sent.
    #[default]
    Keep,
    /// Static headers plus every non-excluded inbound header.
    Join,
    /// Every non-excluded inbound header; static headers are ignored.
    Replace,
}

/// Serialized leaf kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafKind {
    Handler,
    Rest,
}

/// What a matched leaf does with the request.
#[derive(Clone)]
pub enum Leaf {
    /// Served in-process.
    Handler(LocalHandler),
    /// Forwarded to the rendered resolve template.
    Rest,
}

impl Leaf {
    pub fn kind(&self) -> LeafKind {
        match self {
            Leaf::Handler(_) => LeafKind::Handler,
            Leaf::Rest => LeafKind::Rest,
        }
    }
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leaf::Handler(_) => f.write_str("Handler(..)"),
            Leaf::Rest => f.write_str("Rest"),
        }
    }
}

/// Route definition as accepted by the management API and carried in cluster events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub resolve: String,
    /// Static headers.
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    /// Header policy.
    #[serde(default)]
    pub tp_header: HeaderPolicy,
    #[serde(default)]
    pub exclude_header: Vec<String>,
    #[serde(default)]
    pub package_name: String,
}

/// A registered route leaf.
#[derive(Clone, Debug)]
pub struct Route {
    pub id: String,
    pub method: Method,
    pub path: String,
    pub resolve: String,
    pub leaf: Leaf,
    pub headers: HeaderMap,
    pub header_policy: HeaderPolicy,
    /// Lowercased header names never forwarded from the inbound request.
    pub exclude_headers: Vec<HeaderName>,
    pub private: bool,
    pub package_name: String,
}

impl Route {
    /// Build a REST route from a definition. `id` overrides the definition's own id.
    pub fn from_definition(def: &RouteDefinition, id: String) -> Result<Self, RouteError> {
        let method = parse_method(&def.method)?;
        validate_path(&def.path)?;
        if def.resolve.trim().is_empty() {
            return Err(RouteError::MissingField("resolve"));
        }
        if def.package_name.trim().is_empty() {
            return Err(RouteError::MissingField("package_name"));
        }

        let mut headers = HeaderMap::with_capacity(def.header.len());
        for (name, value) in &def.header {
            let header_name = parse_header_name(name)?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| RouteError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }

        let exclude_headers = def
            .exclude_header
            .iter()
            .map(|name| parse_header_name(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            method,
            path: def.path.clone(),
            resolve: def.resolve.clone(),
            leaf: Leaf::Rest,
            headers,
            header_policy: def.tp_header,
            exclude_headers,
            private: def.private,
            package_name: def.package_name.clone(),
        })
    }

    /// Build a locally handled route.
    pub fn handler(
        id: impl Into<String>,
        method: Method,
        path: impl Into<String>,
        private: bool,
        package_name: impl Into<String>,
        handler: LocalHandler,
    ) -> Self {
        let path = path.into();
        Self {
            id: id.into(),
            method,
            resolve: path.clone(),
            path,
            leaf: Leaf::Handler(handler),
            headers: HeaderMap::new(),
            header_policy: HeaderPolicy::Keep,
            exclude_headers: Vec::new(),
            private,
            package_name: package_name.into(),
        }
    }

    /// Returns true if `name` is in the excluded-header list.
    pub fn is_excluded(&self, name: &HeaderName) -> bool {
        self.exclude_headers.iter().any(|excluded| excluded == name)
    }

    /// Reconstruct the definition this route was registered from.
    pub fn definition(&self) -> RouteDefinition {
        RouteDefinition {
            id: Some(self.id.clone()),
            private: self.private,
            method: self.method.to_string(),
            path: self.path.clone(),
            resolve: self.resolve.clone(),
            header: self
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            tp_header: self.header_policy,
            exclude_header: self
                .exclude_headers
                .iter()
                .map(|name| name.as_str().to_string())
                .collect(),
            package_name: self.package_name.clone(),
        }
    }
}

/// Parse and check a registration method.
pub fn parse_method(raw: &str) -> Result<Method, RouteError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RouteError::MissingField("method"));
    }
    let upper = raw.to_ascii_uppercase();
    SUPPORTED_METHODS
        .iter()
        .find(|m| m.as_str() == upper)
        .cloned()
        .ok_or_else(|| RouteError::UnsupportedMethod(raw.to_string()))
}

fn validate_path(path: &str) -> Result<(), RouteError> {
    if path.trim().is_empty() {
        return Err(RouteError::MissingField("path"));
    }
    if !path.starts_with('/') {
        return Err(RouteError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn parse_header_name(name: &str) -> Result<HeaderName, RouteError> {
    HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes()).map_err(|e| {
        RouteError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> RouteDefinition {
        RouteDefinition {
            method: "get".into(),
            path: "/users/{id}".into(),
            resolve: "http://users.internal/users/{id}".into(),
            package_name: "users".into(),
            ..Default::default()
        }
    }

    #[test]
    fn builds_route_from_definition() {
        let mut def = definition();
        def.header.insert("X-Service".into(), "users".into());
        def.exclude_header.push("Authorization".into());

        let route = Route::from_definition(&def, "r1".into()).unwrap();
        assert_eq!(route.method, Method::GET);
        assert_eq!(route.headers.get("x-service").unwrap(), "users");
        assert!(route.is_excluded(&HeaderName::from_static("authorization")));
        assert_eq!(route.leaf.kind(), LeafKind::Rest);
    }

    #[test]
    fn rejects_missing_fields() {
        let mut def = definition();
        def.resolve.clear();
        assert_eq!(
            Route::from_definition(&def, "r1".into()).unwrap_err(),
            RouteError::MissingField("resolve")
        );

        let mut def = definition();
        def.package_name.clear();
        assert_eq!(
            Route::from_definition(&def, "r1".into()).unwrap_err(),
            RouteError::MissingField("package_name")
        );

        let mut def = definition();
        def.path = "users".into();
        assert!(matches!(
            Route::from_definition(&def, "r1".into()),
            Err(RouteError::InvalidPath(_))
        ));
    }

    #[test]
    fn rejects_unsupported_method() {
        let mut def = definition();
        def.method = "CONNECT".into();
        assert_eq!(
            Route::from_definition(&def, "r1".into()).unwrap_err(),
            RouteError::UnsupportedMethod("CONNECT".into())
        );
    }

    #[test]
    fn definition_round_trips_through_route() {
        let mut def = definition();
        def.tp_header = HeaderPolicy::Join;
        def.exclude_header.push("cookie".into());
        let route = Route::from_definition(&def, "r1".into()).unwrap();

        let back = route.definition();
        assert_eq!(back.id.as_deref(), Some("r1"));
        assert_eq!(back.method, "GET");
        assert_eq!(back.tp_header, HeaderPolicy::Join);
        assert_eq!(back.exclude_header, vec!["cookie".to_string()]);
    }
}
