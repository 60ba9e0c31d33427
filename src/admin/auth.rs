//! Authentication for private routes.
//!
//! Dispatch calls the gateway's [`Authenticator`] before serving any route registered
//! with `private = true`, whether it is a management handler or a proxied REST route.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response::error_response;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,

    #[error("invalid bearer token")]
    Invalid,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        error_response(StatusCode::UNAUTHORIZED, &self.to_string())
    }
}

/// Decides whether a request may reach a private route.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<(), AuthError>;
}

/// Accepts `Authorization: Bearer {api_key}`.
#[derive(Debug, Clone)]
pub struct ApiKeyAuthenticator {
    expected: String,
}

impl ApiKeyAuthenticator {
    pub fn new(api_key: &str) -> Self {
        Self {
            expected: format!("Bearer {api_key}"),
        }
    }
}

impl Authenticator for ApiKeyAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::Missing)?;

        if value == self.expected {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

/// Lets every request through; used when no API key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<(), AuthError> {
        Ok(())
    }
}
