//! Integration test: user endpoints end to end against an in-memory database

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use userbench::server::{AppState, create_router};
use userbench::session::SessionManager;

async fn test_state() -> AppState {
    let sessions = SessionManager::new(":memory:");
    sessions.init().expect("Failed to init");
    sessions.create_tables().await.expect("Failed to create tables");
    AppState {
        sessions: Arc::new(sessions),
    }
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = create_router(state.clone())
        .oneshot(request)
        .await
        .expect("Request failed");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    (status, body.to_vec())
}

fn add_user(name: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/add_user")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::json!({ "name": name }).to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("Response is not JSON")
}

#[tokio::test]
async fn test_add_user_then_list() {
    let state = test_state().await;

    let (status, body) = send(&state, add_user("Alice")).await;
    assert_eq!(status, StatusCode::OK);
    let alice = json(&body);
    assert_eq!(alice["name"], "Alice");
    assert!(alice["id"].is_i64());
    assert!(alice["create_date"].is_string());

    let (status, body) = send(&state, get("/users")).await;
    assert_eq!(status, StatusCode::OK);
    let listing = json(&body);
    let users = listing["users"].as_array().expect("users should be an array");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0], alice);

    assert_eq!(state.sessions.open_sessions(), 0);
}

#[tokio::test]
async fn test_get_user_by_id() {
    let state = test_state().await;

    send(&state, add_user("Alice")).await;
    let (_, body) = send(&state, add_user("Bob")).await;
    let bob = json(&body);

    let uri = format!("/user?id={}", bob["id"]);
    let (status, body) = send(&state, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), bob);
}

#[tokio::test]
async fn test_get_unknown_user_is_null() {
    let state = test_state().await;

    let (status, body) = send(&state, get("/user?id=999")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), Value::Null);
}

#[tokio::test]
async fn test_list_users_empty() {
    let state = test_state().await;

    let (status, body) = send(&state, get("/users")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!({ "users": [] }));
}

#[tokio::test]
async fn test_failing_requests_roll_back_and_release() {
    let state = test_state().await;

    for _ in 0..10 {
        let (status, _) = send(&state, add_user("")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
    assert_eq!(state.sessions.open_sessions(), 0);

    let (status, body) = send(&state, get("/users")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["users"].as_array().map(Vec::len), Some(0));

    let (status, _) = send(&state, add_user("Carol")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_uninitialized_manager_is_server_error() {
    let state = AppState {
        sessions: Arc::new(SessionManager::new(":memory:")),
    };

    let (status, _) = send(&state, get("/users")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_after_shutdown_is_server_error() {
    let state = test_state().await;
    state.sessions.shutdown().await.expect("Failed to shut down");

    let (status, _) = send(&state, add_user("Alice")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
