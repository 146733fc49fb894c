//! HTTP-level tests for the proxy mediator, doubling the upstream API with
//! `wiremock` and driving the router directly with `tower::ServiceExt::oneshot`
//! (mirrors oxicrab's own `gateway` router test style).

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn chat_completion_request_is_redacted_before_forwarding_and_response_is_rehydrated() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{"message": {"role": "assistant", "content": "Sure, I'll email jane@example.com right away."}}]
        })))
        .mount(&upstream)
        .await;

    let state = common::test_state(upstream.uri());
    let app = anonamoose::proxy::router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"messages": [{"role": "user", "content": "please contact jane@example.com"}]}).to_string(),
        ))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    let content = body["choices"][0]["message"]["content"].as_str().unwrap();
    // The upstream double echoes the same email back in its own words; the
    // mediator must rehydrate it to the original address the caller sent.
    assert!(content.contains("jane@example.com"));

    let received = upstream.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let forwarded: Value = serde_json::from_slice(&received[0].body).unwrap();
    let forwarded_content = forwarded["messages"][0]["content"].as_str().unwrap();
    assert!(!forwarded_content.contains("jane@example.com"));
}

#[tokio::test]
async fn redact_toggle_off_forwards_body_verbatim() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-2",
            "choices": [{"message": {"role": "assistant", "content": "ack"}}]
        })))
        .mount(&upstream)
        .await;

    let state = common::test_state(upstream.uri());
    let app = anonamoose::proxy::router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("x-anonamoose-redact", "off")
        .body(Body::from(
            json!({"messages": [{"role": "user", "content": "contact jane@example.com"}]}).to_string(),
        ))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let received = upstream.received_requests().await.unwrap();
    let forwarded: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(forwarded["messages"][0]["content"], "contact jane@example.com");
}

#[tokio::test]
async fn invalid_session_header_is_rejected() {
    let upstream = MockServer::start().await;
    let state = common::test_state(upstream.uri());
    let app = anonamoose::proxy::router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("x-anonamoose-session", "not-a-uuid")
        .body(Body::from(json!({"messages": []}).to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn direct_redact_and_hydrate_round_trip() {
    let upstream = MockServer::start().await;
    let state = common::test_state(upstream.uri());
    let app = anonamoose::proxy::router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/redact")
        .header("content-type", "application/json")
        .body(Body::from(json!({"text": "reach jane@example.com"}).to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let redacted = body_json(resp).await;
    let sanitized = redacted["sanitized"].as_str().unwrap().to_string();
    let session_id = redacted["sessionId"].as_str().unwrap().to_string();
    assert!(!sanitized.contains("jane@example.com"));
    assert_eq!(redacted["bindings"].as_array().unwrap().len(), 1);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/hydrate")
        .header("content-type", "application/json")
        .body(Body::from(json!({"text": sanitized, "sessionId": session_id}).to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let hydrated = body_json(resp).await;
    assert_eq!(hydrated["text"], "reach jane@example.com");
}

#[tokio::test]
async fn locale_restriction_via_direct_redact_layers_field() {
    let upstream = MockServer::start().await;
    let state = common::test_state(upstream.uri());
    let app = anonamoose::proxy::router(state);

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/redact")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"text": "contact jane@example.com", "layers": ["names"]}).to_string(),
        ))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let redacted = body_json(resp).await;
    // Only the `names` layer is enabled, so the email must pass through.
    assert_eq!(redacted["sanitized"], "contact jane@example.com");
    assert!(redacted["bindings"].as_array().unwrap().is_empty());
}
