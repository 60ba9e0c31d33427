//! The management API over HTTP.

mod common;

use common::{admin_client, free_port, spawn_gateway, start_echo_backend, start_tcp_echo, test_config};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn routes_are_managed_over_http() {
    let backend = start_echo_backend().await;
    let gw = spawn_gateway(test_config(), None).await;
    let client = admin_client();

    let denied = reqwest::Client::new()
        .post(gw.url("/routes"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let applied: Value = client
        .post(gw.url("/routes"))
        .json(&json!({
            "method": "GET",
            "path": "/items/{id}",
            "resolve": format!("http://{backend}/catalog/{{id}}"),
            "package_name": "catalog"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = applied["ids"][0].as_str().unwrap().to_string();

    let echoed: Value = reqwest::get(gw.url("/items/7")).await.unwrap().json().await.unwrap();
    assert_eq!(echoed["path"], "/catalog/7");

    let route: Value = client
        .get(gw.url(&format!("/routes/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(route["package_name"], "catalog");

    let packages: Value = client.get(gw.url("/packages")).send().await.unwrap().json().await.unwrap();
    assert!(packages
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["name"] == "catalog"));

    let deleted = client
        .delete(gw.url(&format!("/routes/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);
    assert_eq!(reqwest::get(gw.url("/items/7")).await.unwrap().status(), 404);
    gw.stop().await;
}

#[tokio::test]
async fn port_forward_relays_tcp() {
    let echo = start_tcp_echo().await;
    let local_port = free_port().await;
    let gw = spawn_gateway(test_config(), None).await;
    let client = admin_client();

    let response = client
        .post(gw.url("/proxies/port-forward"))
        .json(&json!({
            "remote_host": echo.ip().to_string(),
            "remote_port": echo.port(),
            "local_port": local_port,
            "package_name": "db"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let applied: Value = response.json().await.unwrap();
    let id = applied["ids"][0].as_str().unwrap().to_string();

    let status: Value = client
        .get(gw.url(&format!("/proxies/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["started"], true);

    let mut stream = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    drop(stream);

    let deleted = client
        .delete(gw.url(&format!("/proxies/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);
    assert!(TcpStream::connect(("127.0.0.1", local_port)).await.is_err());
    gw.stop().await;
}

#[tokio::test]
async fn reset_clears_everything_but_management() {
    let backend = start_echo_backend().await;
    let gw = spawn_gateway(test_config(), None).await;
    let client = admin_client();

    client
        .post(gw.url("/proxies"))
        .json(&json!([{
            "path": "/edge",
            "target": format!("http://{backend}"),
            "package_name": "edge"
        }]))
        .send()
        .await
        .unwrap();
    assert_eq!(reqwest::get(gw.url("/edge/x")).await.unwrap().status(), 200);

    let reset = client.put(gw.url("/reset")).send().await.unwrap();
    assert_eq!(reset.status(), 204);

    assert_eq!(reqwest::get(gw.url("/edge/x")).await.unwrap().status(), 404);
    let proxies: Value = client.get(gw.url("/proxies")).send().await.unwrap().json().await.unwrap();
    assert!(proxies.as_array().unwrap().is_empty());
    assert_eq!(reqwest::get(gw.url("/version")).await.unwrap().status(), 200);
    gw.stop().await;
}
