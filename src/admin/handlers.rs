//! Management API handlers.
//!
//! Each handler runs as a `Handler` leaf. Dispatch puts the [`Gateway`] and the request's
//! [`PathValues`] into the request extensions before the call.

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, Query};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::{Gateway, GatewayError, Origin};
use crate::http::response::error_response;
use crate::proxy::{PortForwardDefinition, ProxyDefinition};
use crate::routing::{PathValues, RouteDefinition};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Json(#[from] JsonRejection),

    #[error(transparent)]
    Query(#[from] QueryRejection),

    #[error("missing path value `{0}`")]
    MissingValue(&'static str),

    #[error("handler called outside gateway dispatch")]
    NoGateway,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        match self {
            AdminError::Gateway(e) => e.into_response(),
            AdminError::Json(e) => error_response(e.status(), &e.body_text()),
            AdminError::Query(e) => error_response(e.status(), &e.body_text()),
            AdminError::MissingValue(_) => {
                error_response(StatusCode::BAD_REQUEST, &self.to_string())
            }
            AdminError::NoGateway => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &self.to_string())
            }
        }
    }
}

type AdminResult<T> = Result<T, AdminError>;

/// Ids assigned by a batch upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applied {
    pub ids: Vec<String>,
}

/// Request body accepted as a single item or an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Batch<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Batch<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Batch::Many(items) => items,
            Batch::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RouteQuery {
    id: Option<String>,
    name: Option<String>,
}

fn gateway(request: &Request<Body>) -> AdminResult<Gateway> {
    request
        .extensions()
        .get::<Gateway>()
        .cloned()
        .ok_or(AdminError::NoGateway)
}

fn path_value(request: &Request<Body>, key: &'static str) -> AdminResult<String> {
    request
        .extensions()
        .get::<PathValues>()
        .and_then(|values| values.get(key))
        .map(str::to_string)
        .ok_or(AdminError::MissingValue(key))
}

async fn batch_body<T: DeserializeOwned>(request: Request<Body>) -> AdminResult<Vec<T>> {
    let Json(batch) = Json::<Batch<T>>::from_request(request, &()).await?;
    Ok(batch.into_vec())
}

pub async fn version(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    Ok(Json(gw.identity().clone()).into_response())
}

/// `GET /routes`, optionally filtered by `id` or package `name`.
pub async fn list_routes(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    let Query(filter) = Query::<RouteQuery>::try_from_uri(request.uri())?;

    if let Some(id) = filter.id.filter(|id| !id.is_empty()) {
        let route = gw.route(&id).ok_or(GatewayError::RouteNotFound(id))?;
        return Ok(Json(crate::gateway::RouteSummary::from(route.as_ref())).into_response());
    }

    let mut routes = gw.routes();
    if let Some(name) = filter.name.filter(|name| !name.is_empty()) {
        routes.retain(|route| route.definition.package_name == name);
    }
    Ok(Json(routes).into_response())
}

pub async fn get_route(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    let id = path_value(&request, "id")?;
    let route = gw.route(&id).ok_or(GatewayError::RouteNotFound(id))?;
    Ok(Json(crate::gateway::RouteSummary::from(route.as_ref())).into_response())
}

pub async fn set_routes(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    let defs: Vec<RouteDefinition> = batch_body(request).await?;
    let ids = gw.set_routes(defs, Origin::Local).await?;
    Ok(Json(Applied { ids }).into_response())
}

pub async fn delete_route(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    let id = path_value(&request, "id")?;
    if gw.delete_route(&id, Origin::Local).await {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(GatewayError::RouteNotFound(id).into())
    }
}

pub async fn list_packages(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    Ok(Json(gw.packages()).into_response())
}

pub async fn reset(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    gw.reset(Origin::Local).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn list_proxies(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    Ok(Json(gw.proxies()).into_response())
}

pub async fn get_proxy(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    let id = path_value(&request, "id")?;
    let proxy = gw.proxy(&id).ok_or(GatewayError::ProxyNotFound(id))?;
    Ok(Json(proxy).into_response())
}

pub async fn set_proxies(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    let defs: Vec<ProxyDefinition> = batch_body(request).await?;
    let ids = gw.set_proxies(defs, Origin::Local).await?;
    Ok(Json(Applied { ids }).into_response())
}

pub async fn set_port_forwards(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    let defs: Vec<PortForwardDefinition> = batch_body(request).await?;
    let ids = gw.set_port_forwards(defs, Origin::Local).await?;
    Ok(Json(Applied { ids }).into_response())
}

pub async fn delete_proxy(request: Request<Body>) -> AdminResult<Response> {
    let gw = gateway(&request)?;
    let id = path_value(&request, "id")?;
    if gw.delete_proxy(&id, Origin::Local).await {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(GatewayError::ProxyNotFound(id).into())
    }
}
