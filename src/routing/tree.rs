//! Per-method route tree.
//!
//! # Responsibilities
//! - Store route leaves keyed by their registered path, one node per segment
//! - Walk the tree for an inbound path and bind parameter values
//! - Enforce the single-parameterized-child invariant at registration time
//!
//! # Design Decisions
//! - Literal children are matched case-insensitively, parameter tags exactly
//! - Registration validates the whole path before touching the tree, so a rejected
//!   registration leaves no intermediate nodes behind
//! - Removing a leaf prunes interior nodes that end up with neither a route nor children

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::routing::param::{segments, ParamKind, Segment};
use crate::routing::route::{HeaderPolicy, LeafKind, Route, RouteDefinition, RouteError};

/// Binding key for a captured query string.
pub const QUERY_KEY: &str = "query";
/// Binding key for a captured matrix fragment.
pub const MATRIX_KEY: &str = "matrix";

/// One path segment in a [`RouteTree`].
#[derive(Debug, Clone)]
pub struct RouteNode {
    tag: String,
    kind: ParamKind,
    route: Option<Arc<Route>>,
    children: Vec<RouteNode>,
}

impl RouteNode {
    fn new(tag: &str, kind: ParamKind) -> Self {
        Self {
            tag: tag.to_string(),
            kind,
            route: None,
            children: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.route.as_ref()
    }

    pub fn children(&self) -> &[RouteNode] {
        &self.children
    }

    fn literal_child(&self, segment: &str) -> Option<&RouteNode> {
        self.children
            .iter()
            .find(|c| c.kind == ParamKind::Literal && c.tag.eq_ignore_ascii_case(segment))
    }

    fn param_child(&self) -> Option<&RouteNode> {
        self.children.iter().find(|c| c.kind.is_param())
    }

    /// Same node a registration segment would create.
    fn is_registered_as(&self, segment: &Segment<'_>) -> bool {
        self.kind == segment.kind
            && match segment.kind {
                ParamKind::Literal => self.tag.eq_ignore_ascii_case(segment.tag),
                _ => self.tag == segment.tag,
            }
    }

    fn child_or_insert(&mut self, segment: &Segment<'_>) -> &mut RouteNode {
        let idx = match self.children.iter().position(|c| c.is_registered_as(segment)) {
            Some(idx) => idx,
            None => {
                self.children.push(RouteNode::new(segment.tag, segment.kind));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    fn is_empty(&self) -> bool {
        self.route.is_none() && self.children.is_empty()
    }

    /// The segment as it would be written in a registration path.
    fn display(&self) -> String {
        match self.kind {
            ParamKind::Literal => self.tag.clone(),
            ParamKind::Path => format!("{{{}}}", self.tag),
            ParamKind::Query => format!("{}?", self.tag),
            ParamKind::Matrix => format!("{};", self.tag),
        }
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(RouteNode::count).sum::<usize>()
    }

    fn collect_routes(&self, out: &mut Vec<Arc<Route>>) {
        if let Some(route) = &self.route {
            out.push(route.clone());
        }
        for child in &self.children {
            child.collect_routes(out);
        }
    }

    fn record(&self, method: &Method) -> NodeRecord {
        let mut record = match &self.route {
            Some(route) => NodeRecord::leaf(route),
            None => NodeRecord {
                method: method.to_string(),
                ..Default::default()
            },
        };
        record.tag = self.tag.clone();
        record.param = self.kind;
        record.routes = self.children.iter().map(|c| c.record(method)).collect();
        record
    }
}

/// Result of walking a tree for an inbound path.
#[derive(Debug, Clone)]
pub struct Match {
    pub route: Arc<Route>,
    pub params: BTreeMap<String, String>,
}

/// Route tree for a single HTTP method.
#[derive(Debug, Clone)]
pub struct RouteTree {
    method: Method,
    root: RouteNode,
}

impl RouteTree {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            root: RouteNode::new("", ParamKind::Literal),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn root(&self) -> &RouteNode {
        &self.root
    }

    /// Check that `path` can be registered without violating tree invariants.
    pub fn check<'p>(&self, path: &'p str) -> Result<Vec<Segment<'p>>, RouteError> {
        let parsed: Vec<Segment<'p>> = segments(path).map(Segment::parse).collect();

        if let Some((_, seg)) = parsed
            .iter()
            .enumerate()
            .find(|(idx, seg)| seg.kind.is_terminal() && *idx + 1 != parsed.len())
        {
            return Err(RouteError::NonTerminalParam {
                path: path.to_string(),
                segment: seg.raw.to_string(),
            });
        }

        let mut node = Some(&self.root);
        for seg in &parsed {
            let Some(current) = node else { break };
            node = if seg.kind == ParamKind::Literal {
                current.literal_child(seg.tag)
            } else {
                match current.param_child() {
                    Some(existing) if existing.is_registered_as(seg) => Some(existing),
                    Some(existing) => {
                        return Err(RouteError::ParamConflict {
                            path: path.to_string(),
                            segment: seg.raw.to_string(),
                            existing: existing.display(),
                        })
                    }
                    None => None,
                }
            };
        }

        Ok(parsed)
    }

    /// Insert or replace the leaf at `route.path`. Returns the replaced leaf, if any.
    pub fn insert(&mut self, route: Arc<Route>) -> Result<Option<Arc<Route>>, RouteError> {
        let path = route.path.clone();
        let parsed = self.check(&path)?;

        let mut node = &mut self.root;
        for seg in &parsed {
            node = node.child_or_insert(seg);
        }
        Ok(node.route.replace(route))
    }

    /// Remove the leaf registered at `path`, pruning empty ancestors.
    pub fn remove(&mut self, path: &str) -> Option<Arc<Route>> {
        let parsed: Vec<Segment<'_>> = segments(path).map(Segment::parse).collect();
        remove_at(&mut self.root, &parsed)
    }

    /// Leaf registered at exactly `path` (registration syntax, not an inbound path).
    pub fn get(&self, path: &str) -> Option<&Arc<Route>> {
        let mut node = &self.root;
        for raw in segments(path) {
            let seg = Segment::parse(raw);
            node = node.children.iter().find(|c| c.is_registered_as(&seg))?;
        }
        node.route.as_ref()
    }

    /// Walk the tree for an inbound `path[?query]`.
    ///
    /// At each segment a literal child wins; otherwise the single parameterized child
    /// decides. A query string attached to the final segment is offered to a query
    /// child first and ignored for matching if none accepts it.
    pub fn find(&self, target: &str) -> Option<Match> {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        let parts: Vec<&str> = segments(path).collect();
        let mut params = BTreeMap::new();
        let mut node = &self.root;

        for (idx, raw) in parts.iter().enumerate() {
            let last = idx + 1 == parts.len();

            if let (true, Some(query)) = (last, query) {
                if let Some(child) = node
                    .param_child()
                    .filter(|c| c.kind == ParamKind::Query && c.tag == *raw)
                {
                    params.insert(QUERY_KEY.to_string(), query.to_string());
                    return leaf(child, params);
                }
            }

            if let Some(child) = node.literal_child(raw) {
                node = child;
                continue;
            }

            let child = node.param_child()?;
            let inbound = Segment::parse(raw);
            match child.kind {
                ParamKind::Path => {
                    params.insert(child.tag.clone(), raw.to_string());
                    node = child;
                }
                ParamKind::Query if inbound.kind == ParamKind::Query && inbound.tag == child.tag => {
                    params.insert(
                        QUERY_KEY.to_string(),
                        inbound.fragment.unwrap_or_default().to_string(),
                    );
                    return leaf(child, params);
                }
                ParamKind::Matrix
                    if inbound.kind == ParamKind::Matrix && inbound.tag == child.tag =>
                {
                    params.insert(
                        MATRIX_KEY.to_string(),
                        inbound.fragment.unwrap_or_default().to_string(),
                    );
                    return leaf(child, params);
                }
                _ => return None,
            }
        }

        leaf(node, params)
    }

    /// All leaves in depth-first order.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let mut out = Vec::new();
        self.root.collect_routes(&mut out);
        out
    }

    /// Number of nodes including the root.
    pub fn node_count(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Serializable form of the whole tree.
    pub fn record(&self) -> NodeRecord {
        self.root.record(&self.method)
    }
}

fn leaf(node: &RouteNode, params: BTreeMap<String, String>) -> Option<Match> {
    node.route.clone().map(|route| Match { route, params })
}

fn remove_at(node: &mut RouteNode, parsed: &[Segment<'_>]) -> Option<Arc<Route>> {
    let Some((first, rest)) = parsed.split_first() else {
        return node.route.take();
    };
    let idx = node.children.iter().position(|c| c.is_registered_as(first))?;
    let removed = remove_at(&mut node.children[idx], rest);
    if removed.is_some() && node.children[idx].is_empty() {
        node.children.remove(idx);
    }
    removed
}

/// Persisted form of a route node and its subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub param: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf: Option<LeafKind>,
    #[serde(default)]
    pub resolve: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    #[serde(default)]
    pub tp_header: HeaderPolicy,
    #[serde(default)]
    pub exclude_header: Vec<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub routes: Vec<NodeRecord>,
}

impl NodeRecord {
    fn leaf(route: &Route) -> Self {
        let def = route.definition();
        Self {
            id: route.id.clone(),
            method: def.method,
            leaf: Some(route.leaf.kind()),
            resolve: def.resolve,
            path: def.path,
            header: def.header,
            tp_header: def.tp_header,
            exclude_header: def.exclude_header,
            private: def.private,
            package_name: def.package_name,
            ..Default::default()
        }
    }

    /// REST leaf definitions in this subtree, depth-first. Handler leaves are skipped;
    /// built-in handlers are mounted by the gateway itself.
    pub fn definitions(&self) -> Vec<RouteDefinition> {
        let mut out = Vec::new();
        self.collect_definitions(&mut out);
        out
    }

    fn collect_definitions(&self, out: &mut Vec<RouteDefinition>) {
        if self.leaf == Some(LeafKind::Rest) {
            out.push(RouteDefinition {
                id: Some(self.id.clone()).filter(|id| !id.is_empty()),
                private: self.private,
                method: self.method.clone(),
                path: self.path.clone(),
                resolve: self.resolve.clone(),
                header: self.header.clone(),
                tp_header: self.tp_header,
                exclude_header: self.exclude_header.clone(),
                package_name: self.package_name.clone(),
            });
        }
        for child in &self.routes {
            child.collect_definitions(out);
        }
    }
}
