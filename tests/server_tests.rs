use std::net::Ipv4Addr;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use lan_probe::server::{router, AppState};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.expect("router is infallible");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1 << 20).await.expect("body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn idle_server_has_no_results() {
    let app = router(AppState::default());
    let (status, body) = call(&app, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["kind"], "none");

    let (status, _) = call(&app, get("/api/results")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let app = router(AppState::default());
    let (status, _) = call(&app, post_json("/api/ports", serde_json::json!({"target": "not-an-ip"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, post_json("/api/hosts", serde_json::json!({"prefix": "10.0"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn port_scan_runs_to_completion() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let app = router(AppState::default());
    let req = serde_json::json!({
        "target": "127.0.0.1",
        "start": port,
        "end": port,
        "timeout_ms": 500,
    });
    let (status, body) = call(&app, post_json("/api/ports", req)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["state"], "running");
    assert_eq!(body["total"], 1);

    let mut done = Value::Null;
    for _ in 0..100 {
        let (_, status) = call(&app, get("/api/status")).await;
        if status["state"] == "done" {
            done = status;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(done["scanned"], 1);
    assert_eq!(done["found"], 1);

    let (status, results) = call(&app, get("/api/results")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results["kind"], "ports");
    assert_eq!(results["ports"][port.to_string()], true);
}
