//! End-to-end tests for the axum error boundary.

#![cfg(feature = "axum")]

use axum::body::{Body, to_bytes};
use axum::extract::Request;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use wellsense_errors::web::{AuthenticatedUser, ErrorBoundary};
use wellsense_errors::{ErrorKind, ErrorResponsePolicy, RaisedError, RingBufferSink, RuntimeMode};

async fn create_user(
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, RaisedError> {
    let Json(body) = payload?;
    if body["email"] == "taken@example.com" {
        return Err(RaisedError::unique_violation(["email"]));
    }
    Ok(Json(json!({ "success": true })))
}

async fn crash() -> Result<&'static str, RaisedError> {
    Err(RaisedError::new("connection refused: db-primary:5432").with_stack("at pool.rs:88"))
}

async fn expired() -> Result<&'static str, RaisedError> {
    Err(RaisedError::expired_token())
}

async fn stamp_user(mut request: Request, next: Next) -> Response {
    request
        .extensions_mut()
        .insert(AuthenticatedUser("user_42".to_owned()));
    next.run(request).await
}

fn app(mode: RuntimeMode) -> (Router, RingBufferSink) {
    app_with_limit(mode, 64 * 1024)
}

fn app_with_limit(mode: RuntimeMode, body_limit: usize) -> (Router, RingBufferSink) {
    let recent = RingBufferSink::new(32, 4096);
    let policy = ErrorResponsePolicy::new(mode, Arc::new(recent.clone()));
    let router = Router::new()
        .route("/api/users", post(create_user))
        .route("/api/crash", get(crash))
        .route("/api/session", get(expired));
    let router = ErrorBoundary::new(policy, body_limit)
        .apply(router)
        .layer(middleware::from_fn(stamp_user));
    (router, recent)
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request {
    let bytes = serde_json::to_vec(&body).unwrap();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .unwrap()
}

#[tokio::test]
async fn unique_conflict_in_development_names_the_field() {
    let (router, recent) = app(RuntimeMode::Development);

    let response = router
        .oneshot(post_json("/api/users", json!({ "email": "taken@example.com" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        body_json(response).await,
        json!({ "success": false, "message": "Resource already exists", "field": "email" })
    );

    let entry = &recent.get_recent(1)[0];
    assert_eq!(entry.kind, ErrorKind::UniqueConstraintConflict);
    assert_eq!(entry.path.as_ref(), "/api/users");
    assert_eq!(entry.user_id.as_deref(), Some("user_42"));
    assert!(entry.fields.iter().any(|(k, v)| *k == "body" && v.contains("taken@example.com")));
}

#[tokio::test]
async fn request_body_still_reaches_handler() {
    let (router, recent) = app(RuntimeMode::Production);

    let response = router
        .oneshot(post_json("/api/users", json!({ "email": "new@example.com" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "success": true }));
    assert!(recent.is_empty());
}

#[tokio::test]
async fn server_error_is_masked_in_production() {
    let (router, recent) = app(RuntimeMode::Production);

    let response = router
        .oneshot(Request::builder().uri("/api/crash").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(
        body_json(response).await,
        json!({ "success": false, "message": "Internal server error" })
    );

    let entry = &recent.get_recent(1)[0];
    assert_eq!(entry.message.as_ref(), "connection refused: db-primary:5432");
}

#[tokio::test]
async fn server_error_shows_stack_in_development() {
    let (router, _) = app(RuntimeMode::Development);

    let response = router
        .oneshot(Request::builder().uri("/api/crash").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["message"], "connection refused: db-primary:5432");
    assert_eq!(body["stack"], "at pool.rs:88");
}

#[tokio::test]
async fn expired_token_is_401_in_production() {
    let (router, _) = app(RuntimeMode::Production);

    let response = router
        .oneshot(Request::builder().uri("/api/session").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        json!({ "success": false, "message": "Authentication token expired" })
    );
}

#[tokio::test]
async fn malformed_json_is_a_validation_failure() {
    let (router, _) = app(RuntimeMode::Development);

    let request = Request::builder()
        .method("POST")
        .uri("/api/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Validation failed");
    assert!(body["errors"].is_array());
}

#[tokio::test]
async fn unmatched_route_uses_fallback() {
    let (router, recent) = app(RuntimeMode::Production);

    let response = router
        .oneshot(post_json("/api/missing", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(response).await,
        json!({ "success": false, "message": "Route POST /api/missing not found" })
    );
    assert!(recent.is_empty());
}

#[tokio::test]
async fn oversized_body_is_recorded_by_length_only() {
    let (router, recent) = app_with_limit(RuntimeMode::Production, 16);
    let body = json!({ "email": "taken@example.com", "password": "hunter2" });
    let declared = serde_json::to_vec(&body).unwrap().len();

    let response = router.oneshot(post_json("/api/users", body)).await.unwrap();

    // The handler still sees the full body.
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let entry = &recent.get_recent(1)[0];
    let recorded = entry
        .fields
        .iter()
        .find(|(k, _)| *k == "body")
        .map(|(_, v)| v.to_string())
        .unwrap();
    assert_eq!(recorded, format!(r#"{{"omitted_bytes":{declared}}}"#));
    assert!(!recorded.contains("hunter2"));
}

#[tokio::test]
async fn body_longer_than_declared_is_a_generic_413() {
    let (router, recent) = app(RuntimeMode::Production);

    let request = Request::builder()
        .method("POST")
        .uri("/api/users")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, 4)
        .body(Body::from(r#"{ "email": "new@example.com" }"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        body_json(response).await,
        json!({ "success": false, "message": "request body exceeds its declared length" })
    );

    let entry = &recent.get_recent(1)[0];
    assert_eq!(entry.kind, ErrorKind::Generic);
    assert_eq!(entry.status, 413);
    assert_eq!(entry.user_id.as_deref(), Some("user_42"));
}

async fn stamp_user_on_response(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .extensions_mut()
        .insert(AuthenticatedUser("inner_7".to_owned()));
    response
}

#[tokio::test]
async fn user_from_inner_auth_layer_is_recorded() {
    let recent = RingBufferSink::new(8, 4096);
    let policy = ErrorResponsePolicy::new(RuntimeMode::Production, Arc::new(recent.clone()));
    let inner = Router::new()
        .route("/api/session", get(expired))
        .layer(middleware::from_fn(stamp_user_on_response));
    let router = ErrorBoundary::new(policy, 1024).apply(inner);

    let response = router
        .oneshot(Request::builder().uri("/api/session").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let entry = &recent.get_recent(1)[0];
    assert_eq!(entry.user_id.as_deref(), Some("inner_7"));
}
