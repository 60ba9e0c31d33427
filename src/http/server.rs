//! HTTP entrypoint.
//!
//! # Responsibilities
//! - Build the axum router: one catch-all route in front of the gateway
//! - Wire up middleware (request timeout, request ID, tracing, concurrency limit)
//! - Dispatch each request to its [`Target`]
//! - Serve until the shutdown future resolves

use std::future::Future;
use std::time::{Duration, Instant};

use axum::body::{Body, HttpBody};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::http::request::{RequestIdExt, RequestIdLayer};
use crate::http::response::error_response;
use crate::observability::metrics;
use crate::routing::{Route, Target};

/// HTTP server in front of one gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(gateway: Gateway, config: &GatewayConfig) -> Self {
        Self {
            router: Self::build_router(gateway, config),
        }
    }

    #[allow(deprecated)]
    fn build_router(gateway: Gateway, config: &GatewayConfig) -> Router {
        Router::new()
            .route("/", any(dispatch))
            .route("/{*path}", any(dispatch))
            .with_state(gateway)
            .layer(GlobalConcurrencyLimitLayer::new(
                config.listener.max_connections.max(1),
            ))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.timeouts.request_secs,
            )))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// The configured router, for embedding in another server.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolve the request and hand it to a local handler, the upstream client or the
/// not-found response.
async fn dispatch(State(gateway): State<Gateway>, mut request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request.request_id().to_string();

    let target = gateway.target(
        &method,
        &path,
        request.uri().query(),
        request.headers(),
    );
    let label = target.label();

    let response = match target {
        Target::NotFound => {
            let uri = original_uri(&request);
            tracing::debug!(request_id = %request_id, method = %method, uri = %uri, "No route matched");
            error_response(StatusCode::NOT_FOUND, &format!("no route for {method} {uri}"))
        }
        Target::Local {
            route,
            handler,
            values,
        } => match authorize(&gateway, Some(route.as_ref()), request.headers(), &request_id) {
            Err(denied) => denied,
            Ok(()) => {
                tracing::debug!(request_id = %request_id, route_id = %route.id, "Local handler");
                request.extensions_mut().insert(gateway.clone());
                request.extensions_mut().insert(values);
                handler(request).await
            }
        },
        Target::Remote {
            route,
            url,
            headers,
        } => match authorize(&gateway, route.as_deref(), request.headers(), &request_id) {
            Err(denied) => denied,
            Ok(()) => {
                tracing::debug!(request_id = %request_id, method = %method, url = %url, "Forwarding");
                let body = request.into_body();
                match gateway
                    .upstream()
                    .forward(method.clone(), &url, headers, body)
                    .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::error!(
                            request_id = %request_id,
                            url = %url,
                            error = %e,
                            "Upstream error"
                        );
                        metrics::record_upstream_error(label);
                        e.into_response()
                    }
                }
            }
        },
    };

    let status = response.status().as_u16();
    on_body_end(response, move || {
        metrics::record_request(method.as_str(), status, label, start)
    })
}

/// Calls its closure once, when dropped.
struct OnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        if let Some(done) = self.0.take() {
            done();
        }
    }
}

/// Run `done` once the response body has been sent in full or abandoned by the client.
fn on_body_end<F>(response: Response, done: F) -> Response
where
    F: FnOnce() + Send + 'static,
{
    let (mut parts, body) = response.into_parts();
    let exact = body.size_hint().exact();
    if exact == Some(0) {
        done();
        return Response::from_parts(parts, body);
    }
    // A streamed body loses its size hint.
    if let Some(len) = exact {
        parts
            .headers
            .entry(header::CONTENT_LENGTH)
            .or_insert_with(|| HeaderValue::from(len));
    }
    let guard = OnDrop(Some(done));
    let stream = body.into_data_stream().map(move |chunk| {
        let _ = &guard;
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}

fn authorize(
    gateway: &Gateway,
    route: Option<&Route>,
    headers: &HeaderMap,
    request_id: &str,
) -> Result<(), Response> {
    let Some(route) = route.filter(|route| route.private) else {
        return Ok(());
    };
    gateway.authenticator().authenticate(headers).map_err(|e| {
        tracing::warn!(request_id = %request_id, route_id = %route.id, error = %e, "Unauthorized");
        e.into_response()
    })
}

/// `scheme://host/path` of the inbound request, as the client addressed it.
fn original_uri(request: &Request<Body>) -> String {
    let headers = request.headers();
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().scheme_str())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or("localhost");
    format!("{scheme}://{host}{}", request.uri().path())
}
