#![allow(dead_code)]

use std::sync::Arc;

use axum_test::TestServer;
use conduit_core::auth::InMemoryUserStore;
use conduit_core::config::{GatewayConfig, RouteLimit};
use conduit_core::ratelimit::RateLimiter;
use conduit_core::server::{create_router, AppState, SessionResponse};
use conduit_core::vector::VectorSearch;
use conduit_core::ProviderRegistry;
use serde_json::{json, Value};

pub const SECRET: &str = "integration-secret-with-at-least-32-bytes";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const PASSWORD: &str = "correct horse battery";

/// A config whose providers all live under `upstream`, one path prefix each.
pub fn config_for(upstream: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.jwt_secret = SECRET.to_string();
    config.auth.admin_emails = vec![ADMIN_EMAIL.to_string()];
    // Every test request shares the "anonymous" identity.
    config.rate_limit.auth = RouteLimit::new(60_000, 1_000, "Too many auth attempts");

    let providers = &mut config.providers;
    for (name, settings) in [
        ("xai", &mut providers.xai),
        ("anthropic", &mut providers.anthropic),
        ("deepseek", &mut providers.deepseek),
        ("openrouter", &mut providers.openrouter),
        ("nvidia", &mut providers.nvidia),
    ] {
        settings.base_url = format!("{upstream}/{name}");
        settings.api_key = Some(format!("{name}-test-key"));
    }
    config
}

pub fn server(config: GatewayConfig) -> TestServer {
    let registry = Arc::new(ProviderRegistry::from_config(&config.providers).unwrap());
    let limiter = RateLimiter::local(config.rate_limit.clone());
    let vector = VectorSearch::supabase(registry.clone(), config.vector_search.clone()).unwrap();
    let users = Arc::new(InMemoryUserStore::new());
    let state = AppState::new(config, registry, limiter, users, vector).unwrap();
    TestServer::new(create_router(state)).unwrap()
}

/// Registers `email` and returns its token.
pub async fn register(server: &TestServer, email: &str) -> String {
    let response = server
        .post("/auth/register")
        .json(&json!({ "email": email, "password": PASSWORD, "name": "Test" }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    response.json::<SessionResponse>().token
}

/// The request's trace id as echoed in the response header.
pub fn request_id(response: &axum_test::TestResponse) -> String {
    response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn assert_envelope(body: &Value, error_type: &str, code: &str) {
    assert_eq!(body["type"], error_type, "body: {body}");
    assert_eq!(body["code"], code, "body: {body}");
    assert!(body["message"].is_string());
    assert!(body["traceId"].is_string());
}

pub fn sse_body(frames: &[&str]) -> String {
    frames.iter().map(|frame| format!("data: {frame}\n\n")).collect()
}

pub fn openai_delta(content: &str) -> String {
    json!({ "choices": [{ "delta": { "content": content }, "finish_reason": null }] }).to_string()
}
