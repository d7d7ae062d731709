mod common;

use common::*;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_embedding(upstream: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/nvidia/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }],
            "model": "nvidia/nv-embedqa-e5-v5"
        })))
        .mount(upstream)
        .await;
}

fn search_body(upstream: &MockServer, query: String) -> Value {
    json!({
        "query": query,
        "threshold": 0.9,
        "limit": 5,
        "supabaseUrl": upstream.uri(),
        "supabaseKey": "service-key"
    })
}

#[tokio::test]
async fn test_threshold_is_passed_through_unfiltered() {
    let upstream = MockServer::start().await;
    mount_embedding(&upstream).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/match_documents"))
        .and(header("apikey", "service-key"))
        .and(header("authorization", "Bearer service-key"))
        .and(body_partial_json(json!({
            "query_embedding": [0.1, 0.2, 0.3],
            "match_threshold": 0.9,
            "match_count": 5
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "content": "close", "similarity": 0.95, "metadata": {} },
            { "id": 2, "content": "far", "similarity": 0.6, "metadata": { "source": "x" } }
        ])))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "search@example.com").await;

    let response = server
        .post("/vector-search")
        .authorization_bearer(&token)
        .json(&search_body(&upstream, "what is ownership".into()))
        .await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["query"], "what is ownership");

    let similarities: Vec<f64> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["similarity"].as_f64().unwrap())
        .collect();
    assert_eq!(similarities, vec![0.95, 0.6]);

    let metadata = &body["metadata"];
    assert_eq!(metadata["resultCount"], 2);
    assert_eq!(metadata["threshold"], 0.9);
    assert_eq!(metadata["embeddingProvider"], "nvidia");
    let total = metadata["totalTime"].as_u64().unwrap();
    let parts = metadata["embeddingTime"].as_u64().unwrap() + metadata["searchTime"].as_u64().unwrap();
    assert_eq!(total, parts);
}

#[tokio::test]
async fn test_oversized_query_is_rejected_before_any_call() {
    let upstream = MockServer::start().await;
    mount_embedding(&upstream).await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "long@example.com").await;

    let response = server
        .post("/vector-search")
        .authorization_bearer(&token)
        .json(&search_body(&upstream, "q".repeat(8001)))
        .await;
    response.assert_status_bad_request();
    let body = response.json::<Value>();
    assert_envelope(&body, "ValidationError", "VALIDATION_ERROR");
    assert_eq!(body["details"]["fields"][0]["field"], "query");

    assert!(upstream.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_every_invalid_field_is_reported() {
    let upstream = MockServer::start().await;
    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "fields@example.com").await;

    let response = server
        .post("/vector-search")
        .authorization_bearer(&token)
        .json(&json!({
            "query": "   ",
            "threshold": 1.5,
            "limit": 0,
            "supabaseUrl": "ftp://example.com",
            "supabaseKey": ""
        }))
        .await;
    response.assert_status_bad_request();

    let fields: Vec<String> = response.json::<Value>()["details"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["field"].as_str().map(str::to_string))
        .collect();
    for expected in ["query", "threshold", "limit", "supabaseUrl", "supabaseKey"] {
        assert!(fields.iter().any(|f| f == expected), "missing {expected} in {fields:?}");
    }
}

#[tokio::test]
async fn test_similarity_service_failure_is_a_provider_error() {
    let upstream = MockServer::start().await;
    mount_embedding(&upstream).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/match_documents"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "function match_documents does not exist"
        })))
        .mount(&upstream)
        .await;

    let server = server(config_for(&upstream.uri()));
    let token = register(&server, "missing@example.com").await;

    let response = server
        .post("/vector-search")
        .authorization_bearer(&token)
        .json(&search_body(&upstream, "anything".into()))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_GATEWAY);
    let body = response.json::<Value>();
    assert_envelope(&body, "ProviderError", "PROVIDER_ERROR");
    assert_eq!(body["details"]["provider"], "supabase");
    assert_eq!(body["details"]["upstreamStatus"], 404);
}
