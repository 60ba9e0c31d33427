//! Path segment classification.
//!
//! # Responsibilities
//! - Decide the parameter kind of a single path segment
//! - Split query/matrix segments into their tag and captured fragment
//!
//! # Design Decisions
//! - `{name}` is checked before `?` and `;` so a path parameter is never
//!   mistaken for a query or matrix segment
//! - Classification is pure and allocation-free

use serde::{Deserialize, Serialize};

/// Parameter kind of a route segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Plain literal segment, matched case-insensitively.
    #[default]
    Literal,
    /// `{name}`: binds the raw segment value under `name`.
    Path,
    /// `tag?query`: binds the query string under `query`, always terminal.
    Query,
    /// `tag;k=v;...`: binds the matrix fragment under `matrix`, always terminal.
    Matrix,
}

impl ParamKind {
    /// Classify a raw path segment.
    pub fn classify(segment: &str) -> Self {
        if segment.len() >= 2 && segment.starts_with('{') && segment.ends_with('}') {
            ParamKind::Path
        } else if segment.contains('?') {
            ParamKind::Query
        } else if segment.contains(';') {
            ParamKind::Matrix
        } else {
            ParamKind::Literal
        }
    }

    /// Returns true for every kind except `Literal`.
    pub fn is_param(self) -> bool {
        self != ParamKind::Literal
    }

    /// Query and matrix parameters end the match.
    pub fn is_terminal(self) -> bool {
        matches!(self, ParamKind::Query | ParamKind::Matrix)
    }
}

/// A classified path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// The segment exactly as it appeared in the path.
    pub raw: &'a str,
    pub kind: ParamKind,
    /// Literal text, path-parameter name, or the prefix before `?`/`;`.
    pub tag: &'a str,
    /// Text after `?`/`;` for query and matrix segments.
    pub fragment: Option<&'a str>,
}

impl<'a> Segment<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let kind = ParamKind::classify(raw);
        let (tag, fragment) = match kind {
            ParamKind::Literal => (raw, None),
            ParamKind::Path => (&raw[1..raw.len() - 1], None),
            ParamKind::Query => split_fragment(raw, '?'),
            ParamKind::Matrix => split_fragment(raw, ';'),
        };
        Self {
            raw,
            kind,
            tag,
            fragment,
        }
    }
}

fn split_fragment(raw: &str, sep: char) -> (&str, Option<&str>) {
    match raw.split_once(sep) {
        Some((tag, fragment)) => (tag, Some(fragment)),
        None => (raw, None),
    }
}

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
