//! End-to-end tests over the HTTP surface: real router, real admission
//! queue, mock CloudCode upstream.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};

use relay_core::config::{AppConfig, MaxConcurrent};
use relay_core::server::{build_router, AppState};
use relay_core::store::CredentialRecord;
use relay_core::CredentialStore;

fn record(token: &str, access: &str) -> CredentialRecord {
    CredentialRecord {
        refresh_token: token.to_string(),
        access_token: access.to_string(),
        expires_in: 3600,
        timestamp: chrono::Utc::now().timestamp_millis(),
        enable: true,
        project_id: Some("test-project-00000".to_string()),
        remark: None,
    }
}

fn sse_hello() -> String {
    concat!(
        "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":",
        "[{\"text\":\"Hello\"}]},\"finishReason\":\"STOP\"}],",
        "\"usageMetadata\":{\"promptTokenCount\":2,\"candidatesTokenCount\":1,\"totalTokenCount\":3}}}\n\n",
    )
    .to_string()
}

/// Mock upstream keyed by bearer token.
async fn mock_upstream(State(_): State<()>, headers: HeaderMap) -> axum::response::Response {
    let bearer = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .trim_start_matches("Bearer ")
        .to_string();
    match bearer.as_str() {
        "access-ok" => (
            axum::http::StatusCode::OK,
            [("content-type", "text/event-stream")],
            sse_hello(),
        )
            .into_response(),
        "access-slow" => {
            tokio::time::sleep(Duration::from_millis(300)).await;
            (
                axum::http::StatusCode::OK,
                [("content-type", "text/event-stream")],
                sse_hello(),
            )
                .into_response()
        },
        "access-429" => (
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", "10")],
            "quota exhausted",
        )
            .into_response(),
        "access-think" => (
            axum::http::StatusCode::OK,
            [("content-type", "text/event-stream")],
            concat!(
                "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"A<thi\"}]}}]}}\n\n",
                "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"nk>B</think>C\"}]},\"finishReason\":\"STOP\"}]}}\n\n",
            ),
        )
            .into_response(),
        _ => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
    }
}

async fn spawn_mock_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/generate", post(mock_upstream)).with_state(());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/generate")
}

struct Relay {
    base: String,
    _dir: tempfile::TempDir,
}

async fn spawn_relay(mut config: AppConfig, records: &[CredentialRecord]) -> Relay {
    let upstream_url = spawn_mock_upstream().await;
    config.api.url = upstream_url;
    config.retry.base_delay = 0;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");
    std::fs::write(&path, serde_json::to_string_pretty(records).unwrap()).unwrap();
    let store = Arc::new(CredentialStore::new(path));

    let state = AppState::build(config, store).await;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Relay { base: format!("http://{addr}"), _dir: dir }
}

fn chat_body() -> Value {
    json!({
        "model": "gemini-3-pro-preview",
        "messages": [{"role": "user", "content": "hi"}],
    })
}

#[tokio::test]
async fn test_models_endpoint() {
    let relay = spawn_relay(AppConfig::default(), &[record("tok-a", "access-ok")]).await;
    let body: Value = reqwest::get(format!("{}/v1/models", relay.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["object"], "list");
    let data = body["data"].as_array().unwrap();
    assert!(!data.is_empty());
    assert_eq!(data[0]["object"], "model");
    assert_eq!(data[0]["owned_by"], "google");
}

#[tokio::test]
async fn test_missing_messages_is_400() {
    let relay = spawn_relay(AppConfig::default(), &[record("tok-a", "access-ok")]).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/v1/chat/completions", relay.base))
        .json(&json!({"model": "gemini-3-pro-preview"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "validation");
}

#[tokio::test]
async fn test_api_key_enforcement() {
    let mut config = AppConfig::default();
    config.security.api_key = Some("sk-relay-test".to_string());
    let relay = spawn_relay(config, &[record("tok-a", "access-ok")]).await;
    let client = reqwest::Client::new();

    let response =
        client.get(format!("{}/v1/models", relay.base)).send().await.unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");

    let response = client
        .get(format!("{}/v1/models", relay.base))
        .header("Authorization", "Bearer sk-relay-test")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Health stays reachable for the monitoring page.
    let response = client.get(format!("{}/health", relay.base)).send().await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_non_streaming_happy_path() {
    let relay = spawn_relay(AppConfig::default(), &[record("tok-a", "access-ok")]).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/v1/chat/completions", relay.base))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();

    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert!(body["choices"][0]["message"].get("tool_calls").is_none());
    assert_eq!(body["usage"]["total_tokens"], 3);

    // Terminal accounting: one success, nothing left in flight.
    let stats: Value = client
        .get(format!("{}/api/stats", relay.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["credentials"][0]["success_count"], 1);
    assert_eq!(stats["credentials"][0]["active_count"], 0);
    assert_eq!(stats["summary"]["total_requests"], 1);
}

#[tokio::test]
async fn test_streaming_emits_chunks_and_done() {
    let relay = spawn_relay(AppConfig::default(), &[record("tok-a", "access-ok")]).await;
    let client = reqwest::Client::new();

    let mut body = chat_body();
    body["stream"] = json!(true);
    let response = client
        .post(format!("{}/v1/chat/completions", relay.base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .starts_with("text/event-stream"));

    let text = response.text().await.unwrap();
    assert!(text.contains("chat.completion.chunk"));
    assert!(text.contains("\"content\":\"Hello\""));
    assert!(text.contains("\"finish_reason\":\"stop\""));
    assert!(text.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn test_reasoning_split_across_chunks() {
    let relay = spawn_relay(AppConfig::default(), &[record("tok-a", "access-think")]).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/v1/chat/completions", relay.base))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();

    // "A<thi" + "nk>B</think>C" reassembles to text AC, reasoning B.
    assert_eq!(body["choices"][0]["message"]["content"], "AC");
    assert_eq!(body["choices"][0]["message"]["reasoning_content"], "B");
}

#[tokio::test]
async fn test_rate_limited_pool_surfaces_retry_after() {
    let mut config = AppConfig::default();
    config.retry.max_retries = 1;
    let relay = spawn_relay(config, &[record("tok-a", "access-429")]).await;
    let client = reqwest::Client::new();

    // First request burns the retry budget and puts the only credential on
    // a 10s cooldown.
    let response = client
        .post(format!("{}/v1/chat/completions", relay.base))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);

    // Second request finds every credential cooling: 429 plus Retry-After
    // derived from the minimum remaining cooldown.
    let response = client
        .post(format!("{}/v1/chat/completions", relay.base))
        .json(&chat_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);
    let retry_after: u64 = response
        .headers()
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse().ok())
        .expect("Retry-After header present");
    assert!((1..=10).contains(&retry_after), "got {retry_after}");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "rate_limit_error");
}

#[tokio::test]
async fn test_queue_saturation() {
    let mut config = AppConfig::default();
    config.concurrency.max_concurrent = MaxConcurrent::Fixed(1);
    config.concurrency.queue_limit = 1;
    let relay = spawn_relay(config, &[record("tok-a", "access-slow")]).await;

    let url = format!("{}/v1/chat/completions", relay.base);
    let client = reqwest::Client::new();

    let c1 = client.clone();
    let u1 = url.clone();
    let r1 = tokio::spawn(async move { c1.post(u1).json(&chat_body()).send().await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let c2 = client.clone();
    let u2 = url.clone();
    let r2 = tokio::spawn(async move { c2.post(u2).json(&chat_body()).send().await.unwrap() });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // First in flight, second waiting: the third must bounce.
    let r3 = client.post(&url).json(&chat_body()).send().await.unwrap();
    assert_eq!(r3.status(), 503);
    let body: Value = r3.json().await.unwrap();
    assert_eq!(body["error"]["type"], "queue_full");

    // The queued request completes once the first slot frees.
    assert_eq!(r1.await.unwrap().status(), 200);
    assert_eq!(r2.await.unwrap().status(), 200);
}
