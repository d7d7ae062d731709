//! Helpers for interpreting upstream HTTP failures.

use serde_json::Value;

use super::types::{ProviderError, ProviderId, Result};

/// Raw text bodies kept in error details are cut to this many bytes.
pub const MAX_ERROR_BODY_BYTES: usize = 2048;

/// A non-2xx upstream reply, reduced to what callers may see.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamFailure {
    pub status: u16,
    pub message: String,
    pub body: Option<Value>,
}

impl UpstreamFailure {
    pub fn into_provider_error(self, provider: ProviderId) -> ProviderError {
        ProviderError::Upstream {
            provider,
            status: self.status,
            message: self.message,
            body: self.body,
        }
    }
}

/// Parses an error body.
///
/// JSON bodies are kept whole and searched for `error.message`, `message`,
/// then a string `error`. Anything else is kept as truncated text.
pub fn parse_upstream_failure(status: u16, text: &str) -> UpstreamFailure {
    let generic = || format!("upstream request failed with status {status}");

    match serde_json::from_str::<Value>(text) {
        Ok(body) => UpstreamFailure {
            status,
            message: extract_message(&body).unwrap_or_else(generic),
            body: Some(body),
        },
        Err(_) => UpstreamFailure {
            status,
            message: generic(),
            body: (!text.trim().is_empty()).then(|| Value::String(truncate(text).to_string())),
        },
    }
}

/// Reads the whole body of a failed response.
pub async fn read_failure(response: reqwest::Response) -> UpstreamFailure {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    parse_upstream_failure(status, &text)
}

/// Passes 2xx responses through and turns anything else into [`ProviderError::Upstream`].
pub async fn ensure_success(provider: ProviderId, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let failure = read_failure(response).await;
    tracing::warn!(%provider, status = failure.status, message = %failure.message, "upstream rejected request");
    Err(failure.into_provider_error(provider))
}

fn extract_message(body: &Value) -> Option<String> {
    body.pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| body.get("message").and_then(Value::as_str))
        .or_else(|| body.get("error").and_then(Value::as_str))
        .filter(|message| !message.trim().is_empty())
        .map(str::to_string)
}

fn truncate(text: &str) -> &str {
    if text.len() <= MAX_ERROR_BODY_BYTES {
        return text;
    }
    let mut end = MAX_ERROR_BODY_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_error_message() {
        let failure = parse_upstream_failure(
            401,
            r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
        );
        assert_eq!(failure.message, "Incorrect API key provided");
        assert_eq!(failure.body.unwrap()["error"]["type"], "invalid_request_error");
    }

    #[test]
    fn test_top_level_message_and_string_error() {
        assert_eq!(parse_upstream_failure(400, r#"{"message":"bad model"}"#).message, "bad model");
        assert_eq!(parse_upstream_failure(429, r#"{"error":"slow down"}"#).message, "slow down");
    }

    #[test]
    fn test_unrecognised_json_uses_generic_message() {
        let failure = parse_upstream_failure(500, r#"{"detail":"oops"}"#);
        assert_eq!(failure.message, "upstream request failed with status 500");
        assert_eq!(failure.body.unwrap()["detail"], "oops");
    }

    #[test]
    fn test_text_body_is_truncated() {
        let text = "é".repeat(MAX_ERROR_BODY_BYTES);
        let failure = parse_upstream_failure(502, &text);

        assert_eq!(failure.message, "upstream request failed with status 502");
        let kept = failure.body.unwrap();
        let kept = kept.as_str().unwrap();
        assert!(kept.len() <= MAX_ERROR_BODY_BYTES);
        assert!(text.starts_with(kept));
    }

    #[test]
    fn test_empty_body() {
        let failure = parse_upstream_failure(503, "");
        assert!(failure.body.is_none());
    }
}
