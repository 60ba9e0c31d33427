//! Target building: what to do with a resolved request and which headers to send.
//!
//! # Header policies
//! ```text
//! Keep    → static headers only
//! Join    → static headers, then inbound headers not excluded
//! Replace → inbound headers not excluded
//! ```
//!
//! Hop-by-hop headers and `Host` are never copied from the inbound request; the
//! upstream client sets its own.

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderName};

use crate::routing::resolver::{PathValues, Resolution};
use crate::routing::route::{HeaderPolicy, Leaf, LocalHandler, Route};

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// Where a request goes after resolution.
pub enum Target {
    /// Nothing matched; the entrypoint hands the request to its not-found handler.
    NotFound,
    /// Served by an in-process handler.
    Local {
        route: Arc<Route>,
        handler: LocalHandler,
        values: PathValues,
    },
    /// Forwarded to `url` with `headers`.
    Remote {
        route: Option<Arc<Route>>,
        url: String,
        headers: HeaderMap,
    },
}

impl Target {
    /// Label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Target::NotFound => "not_found",
            Target::Local { .. } => "handler",
            Target::Remote { route: Some(_), .. } => "rest",
            Target::Remote { route: None, .. } => "reverse_proxy",
        }
    }
}

/// Build the target for a resolution.
pub fn build(resolution: Option<Resolution>, inbound: &HeaderMap) -> Target {
    let Some(resolution) = resolution else {
        return Target::NotFound;
    };
    match &resolution.route.leaf {
        Leaf::Handler(handler) => Target::Local {
            handler: handler.clone(),
            values: resolution.values,
            route: resolution.route,
        },
        Leaf::Rest => Target::Remote {
            headers: outbound_headers(&resolution.route, inbound),
            url: resolution.resolve,
            route: Some(resolution.route),
        },
    }
}

/// Outbound header set for `route` under its header policy.
pub fn outbound_headers(route: &Route, inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    match route.header_policy {
        HeaderPolicy::Keep => {
            out.extend(route.headers.clone());
        }
        HeaderPolicy::Join => {
            out.extend(route.headers.clone());
            copy_inbound(inbound, &mut out, |name| route.is_excluded(name));
        }
        HeaderPolicy::Replace => {
            copy_inbound(inbound, &mut out, |name| route.is_excluded(name));
        }
    }
    out
}

/// Inbound headers minus hop-by-hop headers, for reverse-proxy entries.
pub fn passthrough_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    copy_inbound(inbound, &mut out, |_| false);
    out
}

/// First inbound value sets the header, later values append.
fn copy_inbound(inbound: &HeaderMap, out: &mut HeaderMap, excluded: impl Fn(&HeaderName) -> bool) {
    for name in inbound.keys() {
        if excluded(name) || HOP_BY_HOP.contains(name) {
            continue;
        }
        let mut values = inbound.get_all(name).iter();
        if let Some(first) = values.next() {
            out.insert(name.clone(), first.clone());
        }
        for value in values {
            out.append(name.clone(), value.clone());
        }
    }
}
