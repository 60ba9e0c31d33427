//! Response handling and transformation.
//!
//! # Responsibilities
//! - Filter upstream response headers before they reach the client
//! - Render gateway-generated errors as JSON bodies
//!
//! # Design Decisions
//! - `Content-Length` is dropped because the body is re-streamed
//! - Oversized header values are dropped rather than truncated

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Longest header value copied back to the client.
pub const MAX_HEADER_VALUE_LEN: usize = 255;

const DENIED: [HeaderName; 5] = [
    header::CONTENT_LENGTH,
    header::CONTENT_SECURITY_POLICY,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::UPGRADE,
];

/// Copy upstream response headers into `dst`.
///
/// `Set-Cookie` values are copied one by one; other multi-value headers are merged
/// with `", "`. Denied headers and values over [`MAX_HEADER_VALUE_LEN`] bytes are
/// skipped.
pub fn copy_response_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for name in src.keys() {
        if DENIED.contains(name) {
            continue;
        }

        let values = src
            .get_all(name)
            .iter()
            .filter(|v| v.len() <= MAX_HEADER_VALUE_LEN);

        if name == header::SET_COOKIE {
            for value in values {
                dst.append(name.clone(), value.clone());
            }
            continue;
        }

        let joined = values
            .map(|v| v.as_bytes())
            .collect::<Vec<_>>()
            .join(&b", "[..]);
        if joined.is_empty() || joined.len() > MAX_HEADER_VALUE_LEN {
            continue;
        }
        if let Ok(value) = HeaderValue::from_bytes(&joined) {
            dst.insert(name.clone(), value);
        }
    }
}

/// JSON error body: `{"error": "..."}`.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
