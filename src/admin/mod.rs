//! Management API.
//!
//! # Data Flow
//! ```text
//! bootstrap / reset → mount_management → Handler leaves under {admin_base}
//! request           → http dispatch (authenticator for private leaves)
//!                   → handlers.rs → Gateway entry points with Origin::Local
//! ```
//!
//! # Design Decisions
//! - Management routes live in the same trees as proxied routes so one resolver serves both
//! - They belong to a reserved package and carry fixed ids, so remounting is idempotent
//! - Handler leaves are never replayed from a snapshot

pub mod auth;
pub mod handlers;

use std::future::Future;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::IntoResponse;

use crate::gateway::{Gateway, GatewayError};
use crate::routing::{local_handler, LocalHandler, Route};

pub use auth::{AllowAll, ApiKeyAuthenticator, AuthError, Authenticator};
pub use handlers::{AdminError, Applied};

/// Package owning the management routes.
pub const MANAGEMENT_PACKAGE: &str = "gateway-management";

fn handler<F, Fut, R>(f: F) -> LocalHandler
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    local_handler(move |request| {
        let response = f(request);
        async move { response.await.into_response() }
    })
}

/// (id suffix, method, path under the base, private, handler)
fn management_routes() -> Vec<(&'static str, Method, &'static str, bool, LocalHandler)> {
    vec![
        ("version", Method::GET, "/version", false, handler(handlers::version)),
        ("routes.list", Method::GET, "/routes", true, handler(handlers::list_routes)),
        ("routes.get", Method::GET, "/routes/{id}", true, handler(handlers::get_route)),
        ("routes.set", Method::POST, "/routes", true, handler(handlers::set_routes)),
        ("routes.delete", Method::DELETE, "/routes/{id}", true, handler(handlers::delete_route)),
        ("packages.list", Method::GET, "/packages", true, handler(handlers::list_packages)),
        ("reset", Method::PUT, "/reset", true, handler(handlers::reset)),
        ("proxies.list", Method::GET, "/proxies", true, handler(handlers::list_proxies)),
        ("proxies.get", Method::GET, "/proxies/{id}", true, handler(handlers::get_proxy)),
        ("proxies.set", Method::POST, "/proxies", true, handler(handlers::set_proxies)),
        (
            "proxies.port_forward",
            Method::POST,
            "/proxies/port-forward",
            true,
            handler(handlers::set_port_forwards),
        ),
        ("proxies.delete", Method::DELETE, "/proxies/{id}", true, handler(handlers::delete_proxy)),
    ]
}

/// Mount (or remount) every management route under the gateway's admin base path.
pub fn mount_management(gateway: &Gateway) -> Result<(), GatewayError> {
    let base = gateway.admin_base().trim_end_matches('/').to_string();
    let routes = management_routes();
    let count = routes.len();
    for (name, method, path, private, handler) in routes {
        gateway.mount(Route::handler(
            format!("{MANAGEMENT_PACKAGE}.{name}"),
            method,
            format!("{base}{path}"),
            private,
            MANAGEMENT_PACKAGE,
            handler,
        ))?;
    }
    tracing::debug!(base = %base, routes = count, "Management routes mounted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Origin;
    use crate::routing::Target;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};

    async fn call(gw: &Gateway, method: Method, uri: &str, body: Option<Value>) -> Response {
        let (path, query) = uri.split_once('?').map_or((uri, None), |(p, q)| (p, Some(q)));
        let target = gw.target(&method, path, query, &HeaderMap::new());
        let Target::Local {
            handler, values, ..
        } = target
        else {
            panic!("{method} {uri} is not a management route");
        };
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let mut request = request.body(body).unwrap();
        request.extensions_mut().insert(gw.clone());
        request.extensions_mut().insert(values);
        handler(request).await
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn gateway() -> Gateway {
        let gw = Gateway::builder("gw", "1")
            .admin_base("/admin/")
            .build()
            .unwrap();
        gw.bootstrap().await.unwrap();
        gw
    }

    #[tokio::test]
    async fn remount_is_idempotent() {
        let gw = gateway().await;
        let before = gw.routes().len();
        mount_management(&gw).unwrap();
        assert_eq!(gw.routes().len(), before);
        assert_eq!(gw.package(MANAGEMENT_PACKAGE).unwrap().routes.len(), before);
    }

    #[tokio::test]
    async fn version_is_public_and_reports_identity() {
        let gw = gateway().await;
        let route = gw.route(&format!("{MANAGEMENT_PACKAGE}.version")).unwrap();
        assert!(!route.private);
        assert!(gw.route(&format!("{MANAGEMENT_PACKAGE}.reset")).unwrap().private);

        let body = json_body(call(&gw, Method::GET, "/admin/version", None).await).await;
        assert_eq!(body["name"], "gw");
        assert_eq!(body["version"], "1");
    }

    #[tokio::test]
    async fn route_crud() {
        let gw = gateway().await;
        let response = call(
            &gw,
            Method::POST,
            "/admin/routes",
            Some(json!([{
                "method": "GET",
                "path": "/users/{id}",
                "resolve": "http://users/{id}",
                "package_name": "users"
            }])),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let id = json_body(response).await["ids"][0]
            .as_str()
            .unwrap()
            .to_string();

        let listed = json_body(call(&gw, Method::GET, "/admin/routes?name=users", None).await).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let by_query =
            json_body(call(&gw, Method::GET, &format!("/admin/routes?id={id}"), None).await).await;
        assert_eq!(by_query["path"], "/users/{id}");

        let by_path =
            json_body(call(&gw, Method::GET, &format!("/admin/routes/{id}"), None).await).await;
        assert_eq!(by_path["leaf"], "rest");

        let deleted = call(&gw, Method::DELETE, &format!("/admin/routes/{id}"), None).await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        let missing = call(&gw, Method::DELETE, &format!("/admin/routes/{id}"), None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_batch_is_client_error() {
        let gw = gateway().await;
        let response = call(
            &gw,
            Method::POST,
            "/admin/routes",
            Some(json!({"method": "GET", "path": "/x", "package_name": "p"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("resolve"));

        let response = call(&gw, Method::POST, "/admin/proxies", Some(json!("nope"))).await;
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn reset_keeps_management_routes() {
        let gw = gateway().await;
        gw.set_proxies(
            vec![crate::proxy::ProxyDefinition {
                path: "/api".into(),
                target: "http://backend".into(),
                package_name: "pkg".into(),
                ..Default::default()
            }],
            Origin::Local,
        )
        .await
        .unwrap();

        let response = call(&gw, Method::PUT, "/admin/reset", None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(gw.proxies().is_empty());

        let packages = json_body(call(&gw, Method::GET, "/admin/packages", None).await).await;
        let names: Vec<&str> = packages
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|p| p["name"].as_str())
            .collect();
        assert_eq!(names, vec![MANAGEMENT_PACKAGE]);
    }
}
