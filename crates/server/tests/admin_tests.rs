//! Integration tests for the stat and admin endpoints.

mod common;

use axum::http::{Method, StatusCode, header};
use bytes::Bytes;
use common::{ADMIN_CLIENT, OUTSIDE_CLIENT, TestOrigin, TestServer};
use larder_core::CacheKey;
use larder_server::error::ERROR_CODE_HEADER;
use serde_json::Value;

async fn populated() -> (TestOrigin, TestServer) {
    let origin = TestOrigin::start().await;
    origin.put("/a/one.png", "0123456789");
    origin.put("/b/two.png", "01234567890123456789");
    let server = TestServer::new(&origin.url).await;
    server.get("/a/one.png").await;
    server.get("/b/two.png").await;
    (origin, server)
}

#[tokio::test]
async fn stat_reports_counters() {
    let (_origin, server) = populated().await;
    server.get("/a/one.png").await;

    let response = server.get("/stat").await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.text();
    assert!(body.starts_with("Available paths: 2\n"), "{body}");
    assert!(body.contains("Busy paths: 0\n"));
    assert!(body.contains("Purged paths: 0\n"));
    assert!(body.contains("Fast hits: 1\n"));
    assert!(body.contains("Stores: 2\n"));
    assert!(body.contains("Bytes fetched: 30 B\n"));
    assert!(body.contains("Bytes sent: 40 B\n"));
    assert!(body.contains("Size dist\n=========\n0 MB 3\n1 MB 0\n"));
}

#[tokio::test]
async fn stat_head_is_empty() {
    let origin = TestOrigin::start().await;
    let server = TestServer::new(&origin.url).await;

    let response = server.request(Method::HEAD, "/stat", ADMIN_CLIENT).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn stat_active_is_empty_when_idle() {
    let (_origin, server) = populated().await;
    let response = server.get("/stat/active").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn stat_active_lists_in_flight_transfers() {
    let origin = TestOrigin::start().await;
    origin.put("/slow", "0123456789");
    origin.gate("/slow");
    let server = TestServer::new(&origin.url).await;

    let in_flight = server.send(Method::GET, "/slow", ADMIN_CLIENT).await;
    let response = server.get("/stat/active").await;
    assert_eq!(response.text(), "1 /slow\n");

    origin.release(1);
    common::collect(in_flight).await;
    assert!(server.get("/stat/active").await.body.is_empty());
}

#[tokio::test]
async fn lists_available_paths() {
    let (_origin, server) = populated().await;
    let response = server.get("/admin/list/paths").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "/a/one.png\n/b/two.png\n");
}

#[tokio::test]
async fn lists_access_times_oldest_first() {
    let (_origin, server) = populated().await;
    server.get("/a/one.png").await;

    let response = server.get("/admin/list/access-times").await;
    let lines: Vec<String> = response.text().lines().map(str::to_string).collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(" /b/two.png"));
    assert!(lines[1].ends_with(" /a/one.png"));
    let secs: i64 = lines[0].split(' ').next().unwrap().parse().unwrap();
    assert!(secs > 0);

    let limited = server.get("/admin/list/access-times?limit=1").await;
    assert_eq!(limited.text().lines().count(), 1);
}

#[tokio::test]
async fn lists_storage_locations() {
    let (_origin, server) = populated().await;
    let response = server.get("/admin/list/fnames").await;
    let expected = format!(
        "{} /a/one.png\n{} /b/two.png\n",
        CacheKey::encode("/a/one.png").storage_path(),
        CacheKey::encode("/b/two.png").storage_path()
    );
    assert_eq!(response.text(), expected);
}

#[tokio::test]
async fn lists_disk_with_orphans() {
    let (_origin, server) = populated().await;
    let orphan = CacheKey::encode("/c/orphan");
    server
        .state
        .registry
        .storage()
        .put(&orphan.storage_path(), Bytes::from("x"))
        .await
        .unwrap();

    let response = server.get("/admin/list/disk").await;
    assert_eq!(
        response.text(),
        "available /a/one.png\navailable /b/two.png\norphan /c/orphan\n"
    );
}

#[tokio::test]
async fn path_headers_returns_filtered_json() {
    let (_origin, server) = populated().await;

    let response = server.get("/admin/path-headers?path=/a/one.png").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers[header::CONTENT_TYPE], "application/json");
    let headers: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(headers["content-length"], serde_json::json!(["10"]));
    assert_eq!(headers["content-type"], serde_json::json!(["image/png"]));
    assert!(headers.get("server").is_none());
    assert!(headers.get("accept-ranges").is_none());
}

#[tokio::test]
async fn path_headers_validation() {
    let (_origin, server) = populated().await;

    let missing = server.get("/admin/path-headers").await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert!(missing.text().contains("missing path to stat"));

    let unknown = server.get("/admin/path-headers?path=/nope").await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    assert!(unknown.text().contains("path is not available"));
}

#[tokio::test]
async fn available_size_sums_content_lengths() {
    let (_origin, server) = populated().await;
    let response = server.get("/admin/available-size").await;
    assert_eq!(response.text(), "30\n");
}

#[tokio::test]
async fn delete_path_removes_file_and_state() {
    let (_origin, server) = populated().await;
    let key = CacheKey::encode("/a/one.png");

    let response = server
        .request(Method::POST, "/admin/delete-path?path=/a/one.png", ADMIN_CLIENT)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    assert!(!server.state.registry.is_available(&key));
    assert!(!server.state.registry.recency().contains("/a/one.png"));
    assert_eq!(server.state.registry.probe_disk_size(&key).await.unwrap(), None);
    assert_eq!(server.state.registry.count_available(), 1);
}

#[tokio::test]
async fn delete_path_of_busy_key_is_refused() {
    let (_origin, server) = populated().await;
    let key = CacheKey::encode("/a/one.png");
    let _claim = server.state.registry.claim(&key).unwrap();

    let response = server
        .request(Method::POST, "/admin/delete-path?path=/a/one.png", ADMIN_CLIENT)
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.headers[ERROR_CODE_HEADER], "busy");
    assert!(server.state.registry.is_available(&key));
    assert_eq!(
        server.state.registry.probe_disk_size(&key).await.unwrap(),
        Some(10)
    );
}

#[tokio::test]
async fn delete_path_requires_path() {
    let (_origin, server) = populated().await;
    let response = server
        .request(Method::POST, "/admin/delete-path", ADMIN_CLIENT)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.text().contains("missing path to delete"));
}

#[tokio::test]
async fn admin_routes_reject_outside_clients() {
    let (_origin, server) = populated().await;

    for (method, uri) in [
        (Method::GET, "/admin/list/paths"),
        (Method::GET, "/admin/available-size"),
        (Method::POST, "/admin/delete-path?path=/a/one.png"),
    ] {
        let response = server.request(method, uri, OUTSIDE_CLIENT).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(response.headers[ERROR_CODE_HEADER], "unauthorized");
    }
    assert_eq!(server.state.registry.count_available(), 2);
}
