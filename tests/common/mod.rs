//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use route_gateway::cluster::EventBus;
use route_gateway::config::GatewayConfig;
use route_gateway::lifecycle::{start_with_bus, Shutdown};
use route_gateway::Gateway;

pub const API_KEY: &str = "test-key";

/// Start an HTTP backend that answers every request with a JSON echo of the method,
/// path, query, headers and body. It also sets two cookies.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(echo);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn echo(request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let headers: BTreeMap<String, String> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let body = axum::body::to_bytes(body, 1 << 20).await.unwrap_or_default();

    let mut response = Json(json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
    .into_response();
    let out = response.headers_mut();
    out.append(header::SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
    out.append(header::SET_COOKIE, HeaderValue::from_static("b=2; Path=/"));
    out.insert("x-backend", HeaderValue::from_static("echo"));
    response
}

/// Start an HTTP backend that always answers with `status` and `body`.
pub async fn start_status_backend(status: u16, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let status = StatusCode::from_u16(status).unwrap();
    let app = Router::new().fallback(move || async move { (status, body) });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a TCP server that writes back whatever it reads.
pub async fn start_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// A free local port (bound then released).
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Config for a test gateway on an ephemeral port with an API key.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.gateway.name = "it".into();
    config.gateway.version = "1".into();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.admin.api_key = API_KEY.into();
    config
}

/// A running gateway.
pub struct Running {
    pub gateway: Gateway,
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: tokio::task::JoinHandle<()>,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the gateway to drain and flush.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("gateway did not shut down")
            .expect("gateway task panicked");
    }
}

pub async fn spawn_gateway(config: GatewayConfig, bus: Option<Arc<dyn EventBus>>) -> Running {
    let app = start_with_bus(config, bus).await.unwrap();
    let addr = app.local_addr().unwrap();
    let gateway = app.gateway().clone();
    let shutdown = app.shutdown_handle();
    let task = tokio::spawn(async move {
        app.run(std::future::pending()).await.unwrap();
    });
    Running {
        gateway,
        addr,
        shutdown,
        task,
    }
}

/// Client that authenticates against the management API.
pub fn admin_client() -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_str(&format!("Bearer {API_KEY}")).unwrap(),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .unwrap()
}
