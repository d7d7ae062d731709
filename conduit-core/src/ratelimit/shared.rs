//! Counters in an external Redis store reached over its REST interface.
//!
//! Speaks the Upstash-compatible protocol: `GET {url}/ping` to probe, and
//! `POST {url}/multi-exec` for a transaction. All instances pointed at the
//! same store share one count per key.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{CounterStore, RateLimitError, WindowHit};
use crate::config::BackendKind;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SharedCounterStore {
    base_url: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl SharedCounterStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, RateLimitError> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RateLimitError::Store(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            http_client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http_client
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Checks that the store answers `PING`.
    pub async fn ping(&self) -> Result<(), RateLimitError> {
        let response = self
            .request(reqwest::Method::GET, "ping")
            .send()
            .await
            .map_err(|e| RateLimitError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RateLimitError::Unreachable(format!(
                "ping returned HTTP {}",
                response.status()
            )));
        }

        let reply: Reply = response
            .json()
            .await
            .map_err(|e| RateLimitError::Store(e.to_string()))?;
        match reply.result.as_ref().and_then(Value::as_str) {
            Some("PONG") => Ok(()),
            _ => Err(RateLimitError::Store(
                reply.error.unwrap_or_else(|| "unexpected ping reply".into()),
            )),
        }
    }
}

/// Integer replies may come back as numbers or strings.
fn as_integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl CounterStore for SharedCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowHit, RateLimitError> {
        let window_ms = window.as_millis().to_string();
        // INCR, then start the expiry only if the key has none, then read what is left.
        let transaction = serde_json::json!([
            ["INCR", key],
            ["PEXPIRE", key, window_ms, "NX"],
            ["PTTL", key],
        ]);

        let response = self
            .request(reqwest::Method::POST, "multi-exec")
            .json(&transaction)
            .send()
            .await
            .map_err(|e| RateLimitError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RateLimitError::Store(format!(
                "multi-exec returned HTTP {}",
                response.status()
            )));
        }

        let replies: Vec<Reply> = response
            .json()
            .await
            .map_err(|e| RateLimitError::Store(e.to_string()))?;
        if let Some(error) = replies.iter().find_map(|r| r.error.clone()) {
            return Err(RateLimitError::Store(error));
        }

        let count = as_integer(replies.first().and_then(|r| r.result.as_ref()))
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| RateLimitError::Store("INCR returned no count".into()))?;
        let ttl_ms = as_integer(replies.get(2).and_then(|r| r.result.as_ref())).unwrap_or(-1);
        let reset_after = u64::try_from(ttl_ms)
            .map(Duration::from_millis)
            .unwrap_or(window);

        Ok(WindowHit { count, reset_after })
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Shared
    }
}
