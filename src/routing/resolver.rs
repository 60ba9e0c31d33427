//! Resolution of an inbound method + path into a concrete target string.
//!
//! # Responsibilities
//! - Select the tree for the inbound method and walk it
//! - Render the leaf's resolve template with the bound parameters
//! - Expose individual query/matrix pairs as per-request path values

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::http::Method;

use crate::routing::route::Route;
use crate::routing::tree::{RouteTree, MATRIX_KEY, QUERY_KEY};

/// Values bound while resolving a request, available to local handlers via request
/// extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathValues(BTreeMap<String, String>);

impl PathValues {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn from_params(params: &BTreeMap<String, String>) -> Self {
        let mut values = params.clone();
        if let Some(query) = params.get(QUERY_KEY) {
            extend_pairs(&mut values, query, '&');
        }
        if let Some(matrix) = params.get(MATRIX_KEY) {
            extend_pairs(&mut values, matrix, ';');
        }
        Self(values)
    }
}

fn extend_pairs(values: &mut BTreeMap<String, String>, fragment: &str, sep: char) {
    for pair in fragment.split(sep).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        values
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
}

/// A matched leaf with its bindings applied.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub route: Arc<Route>,
    /// Parameter name → bound value, including `query`/`matrix` captures.
    pub params: BTreeMap<String, String>,
    /// The leaf's resolve template with the bindings substituted.
    pub resolve: String,
    pub values: PathValues,
}

/// Resolve `target` (path plus optional query string) against the tree for `method`.
pub fn resolve(
    trees: &HashMap<Method, RouteTree>,
    method: &Method,
    target: &str,
) -> Option<Resolution> {
    let tree = trees.get(method)?;
    let matched = tree.find(target)?;
    let resolve = render(&matched.route.resolve, &matched.params);
    let values = PathValues::from_params(&matched.params);
    Some(Resolution {
        route: matched.route,
        params: matched.params,
        resolve,
        values,
    })
}

/// Substitute bound parameters into a resolve template.
///
/// Path parameters replace their `{name}` placeholder literally. A captured query or
/// matrix fragment replaces the template's own `?`/`;` suffix, or is appended when the
/// template has none.
pub fn render(template: &str, params: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in params {
        if name == QUERY_KEY || name == MATRIX_KEY {
            continue;
        }
        out = out.replace(&format!("{{{name}}}"), value);
    }
    if let Some(query) = params.get(QUERY_KEY) {
        out = replace_suffix(&out, '?', query);
    }
    if let Some(matrix) = params.get(MATRIX_KEY) {
        out = replace_suffix(&out, ';', matrix);
    }
    out
}

fn replace_suffix(template: &str, sep: char, fragment: &str) -> String {
    match template.split_once(sep) {
        Some((head, _)) => format!("{head}{sep}{fragment}"),
        None if fragment.is_empty() => template.to_string(),
        None => format!("{template}{sep}{fragment}"),
    }
}
