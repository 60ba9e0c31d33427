//! Outbound HTTP for REST leaves and reverse-proxy entries.
//!
//! # Data Flow
//! ```text
//! Target::Remote { url, headers }
//!     → client.rs (buffer inbound body, issue call, relaxed TLS)
//!     → http::response (filter response headers)
//!     → streamed response body back to the client
//! ```
//!
//! # Design Decisions
//! - One pooled client per gateway; redirects are returned to the caller, not followed
//! - Transport failures become 502; they never touch routing state

pub mod client;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response::error_response;

pub use client::Upstream;

/// Errors from an outbound call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid upstream url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request body exceeds {limit} bytes or could not be read")]
    RequestBody { limit: usize },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl UpstreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
            UpstreamError::InvalidUrl { .. } | UpstreamError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            UpstreamError::RequestBody { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        error_response(self.status(), &self.to_string())
    }
}
