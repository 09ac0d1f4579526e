mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use clabot_kernel::sign_payload;
use clabot_server::build_app;
use common::*;
use serde_json::json;
use tower::util::ServiceExt;

const SECRET: &str = "It's a Secret to Everybody";

fn app() -> Router {
    build_app(harness().state, "/github")
}

fn signed_app() -> Router {
    build_app(
        harness_with(RecordingChat::default(), correlator_config(), Some(SECRET)).state,
        "/github",
    )
}

fn webhook(event: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/github")
        .header("content-type", "application/json")
        .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958");
    if let Some(event) = event {
        builder = builder.header("x-github-event", event);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn healthz_ok() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn missing_event_header_is_rejected() {
    let body = pull_request_payload("opened", "dave", 7).to_string();
    let response = app().oneshot(webhook(None, &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn unregistered_events_are_acknowledged() {
    let ping = json!({"zen": "Design for failure.", "hook_id": 1}).to_string();
    let response = app().oneshot(webhook(Some("ping"), &ping)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app()
        .oneshot(webhook(Some("push"), "not even json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_registered_payload_is_rejected() {
    let response = app()
        .oneshot(webhook(Some("pull_request"), "{\"action\":"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app()
        .oneshot(webhook(Some("issue_comment"), &json!({"action": "created"}).to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app()
        .oneshot(webhook(Some("release"), "<xml/>"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn registered_events_without_handler_are_acknowledged() {
    let body = json!({"action": "published", "release": {"tag_name": "v1.0.0"}}).to_string();
    let response = app().oneshot(webhook(Some("release"), &body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json!({"action": "created", "comment": {"body": "nit"}}).to_string();
    let response = app()
        .oneshot(webhook(Some("pull_request_review_comment"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn pull_request_and_comment_events_are_accepted() {
    let body = pull_request_payload("opened", "dave", 7).to_string();
    let response = app()
        .oneshot(webhook(Some("pull_request"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = issue_comment_payload("dave", "dave", 7, SIGNAL).to_string();
    let response = app()
        .oneshot(webhook(Some("issue_comment"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn signed_webhook_requires_valid_signature() {
    let body = pull_request_payload("opened", "dave", 7).to_string();

    let response = signed_app()
        .oneshot(webhook(Some("pull_request"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let wrong = sign_payload(b"another secret", body.as_bytes()).unwrap();
    let mut req = webhook(Some("pull_request"), &body);
    req.headers_mut()
        .insert("x-hub-signature-256", wrong.parse().unwrap());
    let response = signed_app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let good = sign_payload(SECRET.as_bytes(), body.as_bytes()).unwrap();
    let mut req = webhook(Some("pull_request"), &body);
    req.headers_mut()
        .insert("x-hub-signature-256", good.parse().unwrap());
    let response = signed_app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unsigned_unregistered_event_is_acknowledged_when_secret_is_set() {
    let ping = json!({"zen": "Keep it logically awesome.", "hook_id": 1}).to_string();
    let response = signed_app()
        .oneshot(webhook(Some("ping"), &ping))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = signed_app()
        .oneshot(webhook(Some("release"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn custom_webhook_path_is_routed() {
    let app = build_app(harness().state, "/hooks/cla");
    let req = Request::builder()
        .method("POST")
        .uri("/hooks/cla")
        .header("x-github-event", "ping")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
