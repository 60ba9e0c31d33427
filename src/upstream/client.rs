//! Pooled upstream client.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use url::Url;

use crate::config::UpstreamConfig;
use crate::http::response::copy_response_headers;
use crate::upstream::UpstreamError;

/// Issues outbound calls for resolved targets.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(UpstreamError::Client)?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Send `method url` with `headers` and the buffered inbound `body`; the response
    /// body is streamed back unbuffered.
    pub async fn forward(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Body,
    ) -> Result<Response, UpstreamError> {
        let url = Url::parse(url).map_err(|e| UpstreamError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| UpstreamError::RequestBody {
                limit: self.max_body_bytes,
            })?;

        tracing::trace!(method = %method, url = %url, body_len = body.len(), "Upstream call");

        let upstream = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = HeaderMap::new();
        copy_response_headers(upstream.headers(), &mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
