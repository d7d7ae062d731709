mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_request(provider: &str, stream: bool) -> Value {
    json!({
        "provider": provider,
        "model": "test-model",
        "messages": [
            { "role": "system", "content": "Be brief." },
            { "role": "user", "content": "Say hello" }
        ],
        "stream": stream,
        "top_p": 0.9
    })
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

/// `data:` payloads in arrival order.
fn data_frames(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_string())
        .collect()
}

fn delta_contents(frames: &[String]) -> Vec<String> {
    frames
        .iter()
        .filter(|frame| frame.as_str() != "[DONE]")
        .filter_map(|frame| serde_json::from_str::<Value>(frame).ok())
        .filter_map(|frame| frame["choices"][0]["delta"]["content"].as_str().map(str::to_string))
        .filter(|content| !content.is_empty())
        .collect()
}

#[tokio::test]
async fn test_chat_relays_completion_and_usage() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xai/chat/completions"))
        .and(header("authorization", "Bearer xai-test-key"))
        .and(body_partial_json(json!({ "model": "test-model", "stream": false, "top_p": 0.9 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "model": "test-model",
            "choices": [{ "message": { "role": "assistant", "content": "Hello!" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 7, "completion_tokens": 5, "total_tokens": 12 }
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "chat@example.com").await;

    let response = server
        .post("/chat")
        .authorization_bearer(&token)
        .json(&chat_request("xai", false))
        .await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello!");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["metadata"]["provider"], "xai");

    let usage = &body["usage"];
    assert_eq!(usage["prompt_tokens"], 7);
    assert_eq!(usage["completion_tokens"], 5);
    assert_eq!(usage["total_tokens"], 12);

    assert!(response.headers().contains_key("ratelimit-remaining"));
}

#[tokio::test]
async fn test_chat_keeps_every_upstream_choice() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openrouter/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-2",
            "object": "chat.completion",
            "model": "test-model",
            "created": 1_700_000_000,
            "system_fingerprint": "fp_abc123",
            "choices": [
                {
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "lookup", "arguments": "{\"q\":\"rust\"}" }
                        }]
                    },
                    "logprobs": null,
                    "finish_reason": "tool_calls"
                },
                {
                    "index": 1,
                    "message": { "role": "assistant", "content": "Second answer" },
                    "finish_reason": "stop"
                }
            ],
            "usage": { "prompt_tokens": 4, "completion_tokens": 9, "total_tokens": 13 }
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "tools@example.com").await;

    let response = server
        .post("/chat")
        .authorization_bearer(&token)
        .json(&chat_request("openrouter", false))
        .await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    let choices = body["choices"].as_array().unwrap();
    assert_eq!(choices.len(), 2);
    assert_eq!(choices[0]["finish_reason"], "tool_calls");
    assert_eq!(choices[0]["message"]["tool_calls"][0]["function"]["name"], "lookup");
    assert!(choices[0].as_object().unwrap().contains_key("logprobs"));
    assert_eq!(choices[1]["message"]["content"], "Second answer");
    assert_eq!(body["system_fingerprint"], "fp_abc123");
    assert_eq!(body["provider"], "openrouter");
    assert_eq!(body["metadata"]["provider"], "openrouter");
    assert_eq!(body["usage"]["total_tokens"], 13);
}

#[tokio::test]
async fn test_unknown_provider_lists_registered_ids() {
    let upstream = MockServer::start().await;
    let mut config = config_for(&upstream.uri());
    config.providers.deepseek.enabled = false;
    let server = server(config);
    let token = register(&server, "unknown@example.com").await;

    let response = server
        .post("/chat")
        .authorization_bearer(&token)
        .json(&chat_request("gpt", false))
        .await;
    response.assert_status_bad_request();

    let body = response.json::<Value>();
    assert_envelope(&body, "ValidationError", "UNKNOWN_PROVIDER");
    assert_eq!(
        body["details"]["availableProviders"],
        json!(["xai", "anthropic", "openrouter", "nvidia"])
    );
    assert!(upstream.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_chat_requires_messages() {
    let upstream = MockServer::start().await;
    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "empty@example.com").await;

    let response = server
        .post("/chat")
        .authorization_bearer(&token)
        .json(&json!({ "provider": "xai", "model": "grok-4", "messages": [] }))
        .await;
    response.assert_status_bad_request();
    let body = response.json::<Value>();
    assert_envelope(&body, "ValidationError", "VALIDATION_ERROR");
    assert_eq!(body["details"]["fields"][0]["field"], "messages");
}

#[tokio::test]
async fn test_chat_without_token_never_reaches_upstream() {
    let upstream = MockServer::start().await;
    let server = server(config_for(&upstream.uri()));

    let response = server.post("/chat").json(&chat_request("xai", false)).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(upstream.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_upstream_error_is_a_provider_error() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/deepseek/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "quota exceeded", "type": "rate_limit" }
        })))
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "quota@example.com").await;

    let response = server
        .post("/chat")
        .authorization_bearer(&token)
        .json(&chat_request("deepseek", false))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);

    let body = response.json::<Value>();
    assert_envelope(&body, "ProviderError", "PROVIDER_ERROR");
    assert!(body["message"].as_str().unwrap().contains("quota exceeded"));
    assert_eq!(body["details"]["provider"], "deepseek");
    assert_eq!(body["details"]["upstreamStatus"], 429);
    assert_eq!(body["details"]["upstreamBody"]["error"]["type"], "rate_limit");
}

#[tokio::test]
async fn test_stream_preserves_fragment_order() {
    let upstream = MockServer::start().await;
    let frames = [
        openai_delta("Hel"),
        openai_delta("lo"),
        openai_delta(" world"),
        json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }] }).to_string(),
        "[DONE]".to_string(),
    ];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    Mock::given(method("POST"))
        .and(path("/openrouter/chat/completions"))
        .and(header("x-title", "conduit"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(event_stream(sse_body(&frames)))
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "stream@example.com").await;

    let response = server
        .post("/chat")
        .authorization_bearer(&token)
        .json(&chat_request("openrouter", true))
        .await;
    response.assert_status_ok();

    let frames = data_frames(&response.text());
    assert_eq!(delta_contents(&frames), vec!["Hel", "lo", " world"]);
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
    assert_eq!(frames.iter().filter(|f| f.as_str() == "[DONE]").count(), 1);

    let first: Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(first["object"], "chat.completion.chunk");
    assert_eq!(first["provider"], "openrouter");
}

#[tokio::test]
async fn test_stream_cut_short_ends_with_error_event() {
    let upstream = MockServer::start().await;
    let frames = [openai_delta("Hel"), openai_delta("lo")];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    Mock::given(method("POST"))
        .and(path("/xai/chat/completions"))
        .respond_with(event_stream(sse_body(&frames)))
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "cut@example.com").await;

    let response = server
        .post("/chat")
        .authorization_bearer(&token)
        .json(&chat_request("xai", true))
        .await;
    // Headers were committed before the failure.
    response.assert_status_ok();

    let text = response.text();
    assert!(
        text.lines().any(|line| line.starts_with("event:") && line.trim_end().ends_with("error")),
        "body: {text}"
    );
    assert!(!text.contains("[DONE]"));

    let frames = data_frames(&text);
    assert_eq!(delta_contents(&frames), vec!["Hel", "lo"]);
    let error: Value = serde_json::from_str(frames.last().unwrap()).unwrap();
    assert_envelope(&error, "ProviderError", "PROVIDER_ERROR");
    assert_eq!(error["traceId"], request_id(&response).as_str());
}

#[tokio::test]
async fn test_stream_rejected_before_first_byte_is_plain_json() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xai/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "bad key" })))
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "early@example.com").await;

    let response = server
        .post("/chat")
        .authorization_bearer(&token)
        .json(&chat_request("xai", true))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    let body = response.json::<Value>();
    assert_envelope(&body, "ProviderError", "PROVIDER_ERROR");
    assert_eq!(body["details"]["upstreamStatus"], 401);
}

#[tokio::test]
async fn test_anthropic_stream_is_normalized() {
    let upstream = MockServer::start().await;
    let body = [
        ("message_start", json!({ "type": "message_start", "message": { "id": "msg_1" } })),
        ("content_block_delta", json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "Hel" } })),
        ("content_block_delta", json!({ "type": "content_block_delta", "index": 0, "delta": { "type": "text_delta", "text": "lo" } })),
        ("message_delta", json!({ "type": "message_delta", "delta": { "stop_reason": "end_turn" } })),
        ("message_stop", json!({ "type": "message_stop" })),
    ]
    .iter()
    .map(|(event, data)| format!("event: {event}\ndata: {data}\n\n"))
    .collect::<String>();

    Mock::given(method("POST"))
        .and(path("/anthropic/messages"))
        .and(header("x-api-key", "anthropic-test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({ "system": "Be brief.", "stream": true })))
        .respond_with(event_stream(body))
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "claude@example.com").await;

    let response = server
        .post("/chat")
        .authorization_bearer(&token)
        .json(&chat_request("anthropic", true))
        .await;
    response.assert_status_ok();

    let frames = data_frames(&response.text());
    assert_eq!(delta_contents(&frames), vec!["Hel", "lo"]);
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn test_embeddings_supported_and_not() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/nvidia/embeddings"))
        .and(body_partial_json(json!({ "input_type": "query" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "embedding": [0.3, 0.4], "index": 1 },
                { "embedding": [0.1, 0.2], "index": 0 }
            ],
            "model": "nvidia/nv-embedqa-e5-v5"
        })))
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "embed@example.com").await;

    let response = server
        .post("/embeddings")
        .authorization_bearer(&token)
        .json(&json!({ "provider": "nvidia", "model": "nvidia/nv-embedqa-e5-v5", "input": ["a", "b"] }))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["data"][0]["index"], 0);
    assert_eq!(body["data"][1]["index"], 1);

    let unsupported = server
        .post("/embeddings")
        .authorization_bearer(&token)
        .json(&json!({ "provider": "anthropic", "model": "claude", "input": "a" }))
        .await;
    unsupported.assert_status(StatusCode::NOT_IMPLEMENTED);
    assert_envelope(&unsupported.json::<Value>(), "NotImplementedError", "NOT_IMPLEMENTED");
}
