//! Canonical request/response types shared by every provider adapter.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{ProviderSettings, ProvidersConfig};
use crate::error::{self, GatewayError};

/// Marker that ends an OpenAI-style event stream.
pub const DONE_MARKER: &str = "[DONE]";

/// The closed set of upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Xai,
    Anthropic,
    Deepseek,
    Openrouter,
    Nvidia,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        ProviderId::Xai,
        ProviderId::Anthropic,
        ProviderId::Deepseek,
        ProviderId::Openrouter,
        ProviderId::Nvidia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Xai => "xai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Deepseek => "deepseek",
            ProviderId::Openrouter => "openrouter",
            ProviderId::Nvidia => "nvidia",
        }
    }

    /// This provider's section of the configuration.
    pub fn settings<'a>(&self, config: &'a ProvidersConfig) -> &'a ProviderSettings {
        match self {
            ProviderId::Xai => &config.xai,
            ProviderId::Anthropic => &config.anthropic,
            ProviderId::Deepseek => &config.deepseek,
            ProviderId::Openrouter => &config.openrouter,
            ProviderId::Nvidia => &config.nvidia,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider '{0}'")]
pub struct UnknownProviderId(pub String);

impl FromStr for ProviderId {
    type Err = UnknownProviderId;

    /// Exact, case-sensitive match.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ProviderId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownProviderId(s.to_string()))
    }
}

/// Errors raised by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} returned HTTP {status}: {message}")]
    Upstream {
        provider: ProviderId,
        status: u16,
        message: String,
        body: Option<Value>,
    },

    #[error("request to {provider} failed: {source}")]
    Transport {
        provider: ProviderId,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} sent an unexpected response: {message}")]
    Decode { provider: ProviderId, message: String },

    #[error("{provider} stream failed: {message}")]
    Stream { provider: ProviderId, message: String },

    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: ProviderId,
        operation: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn transport(provider: ProviderId, source: reqwest::Error) -> Self {
        Self::Transport { provider, source }
    }

    pub fn decode(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::Decode {
            provider,
            message: message.into(),
        }
    }

    pub fn stream(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::Stream {
            provider,
            message: message.into(),
        }
    }

    pub fn provider(&self) -> ProviderId {
        match self {
            ProviderError::Upstream { provider, .. }
            | ProviderError::Transport { provider, .. }
            | ProviderError::Decode { provider, .. }
            | ProviderError::Stream { provider, .. }
            | ProviderError::Unsupported { provider, .. } => *provider,
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        let provider = err.provider().to_string();
        match err {
            ProviderError::Unsupported { .. } => GatewayError::NotImplemented(err.to_string()),
            ProviderError::Upstream {
                status,
                message,
                body,
                ..
            } => GatewayError::Provider {
                provider,
                message,
                upstream_status: Some(status),
                upstream_body: body,
            },
            ProviderError::Transport { source, .. } => GatewayError::Provider {
                message: if source.is_timeout() {
                    "upstream request timed out".to_string()
                } else {
                    "failed to reach upstream provider".to_string()
                },
                provider,
                upstream_status: source.status().map(|s| s.as_u16()),
                upstream_body: None,
            },
            ProviderError::Decode { message, .. } | ProviderError::Stream { message, .. } => {
                GatewayError::Provider {
                    provider,
                    message,
                    upstream_status: None,
                    upstream_body: None,
                }
            }
        }
    }
}

/// A lazy, finite, non-restartable sequence of content fragments.
///
/// Nothing is read from the upstream until the stream is polled, and dropping
/// it drops the upstream connection. A clean end means the provider sent its
/// end marker; a dropped or malformed stream ends with an `Err` item instead.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Provider trait for upstream LLM backends.
///
/// Every adapter implements the same contract, so the dispatcher never
/// branches on which provider it is talking to.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// One request, one complete response.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion>;

    /// Opens a streamed completion.
    ///
    /// Upstream status errors surface here, before any fragment exists.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream>;

    fn supports_embeddings(&self) -> bool {
        false
    }

    async fn embeddings(&self, _request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        Err(ProviderError::Unsupported {
            provider: self.id(),
            operation: "embeddings",
        })
    }

    /// Generate an embedding vector for a single text.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            provider: self.id().to_string(),
            model: model.to_string(),
            input: EmbeddingInput::Single(text.to_string()),
        };
        let response = self.embeddings(&request).await?;

        response
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| ProviderError::decode(self.id(), "No embeddings returned"))
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Canonical chat request, as sent by clients.
///
/// Unknown top-level fields are kept in `options` and forwarded to the
/// upstream verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, alias = "max_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            stream: false,
            options: Map::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Field checks that need no network.
    pub fn validate(&self) -> error::Result<()> {
        let mut problems = Vec::new();

        if self.model.trim().is_empty() {
            problems.push(field_problem("model", "must not be empty"));
        }
        if self.messages.is_empty() {
            problems.push(field_problem("messages", "must contain at least one message"));
        }
        for (index, message) in self.messages.iter().enumerate() {
            if message.content.is_empty() {
                problems.push(field_problem(
                    &format!("messages[{index}].content"),
                    "must not be empty",
                ));
            }
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                problems.push(field_problem("temperature", "must be between 0 and 2"));
            }
        }
        if self.max_tokens == Some(0) {
            problems.push(field_problem("maxTokens", "must be at least 1"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::validation_with(
                "Invalid chat request",
                serde_json::json!({ "fields": problems }),
            ))
        }
    }
}

pub(crate) fn field_problem(field: &str, message: &str) -> Value {
    serde_json::json!({ "field": field, "message": message })
}

/// Token accounting reported by the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Canonical non-streaming chat response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub id: String,
    pub provider: ProviderId,
    pub model: String,
    pub created: i64,
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    /// The upstream body, when it is already a `chat.completion` object.
    /// Carries every choice and any extra fields (tool calls, fingerprints).
    pub native: Option<Map<String, Value>>,
}

/// One fragment of streamed content.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub content: String,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: None,
        }
    }
}

/// Text to embed: a single string or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    pub fn as_vec(&self) -> Vec<&str> {
        match self {
            EmbeddingInput::Single(text) => vec![text.as_str()],
            EmbeddingInput::Batch(texts) => texts.iter().map(String::as_str).collect(),
        }
    }
}

/// Request for generating embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub provider: String,
    pub model: String,
    pub input: EmbeddingInput,
}

impl EmbeddingRequest {
    pub fn validate(&self) -> error::Result<()> {
        let mut problems = Vec::new();

        if self.model.trim().is_empty() {
            problems.push(field_problem("model", "must not be empty"));
        }
        let inputs = self.input.as_vec();
        if inputs.is_empty() || inputs.iter().any(|text| text.is_empty()) {
            problems.push(field_problem("input", "must contain non-empty text"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::validation_with(
                "Invalid embeddings request",
                serde_json::json!({ "fields": problems }),
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub embedding: Vec<f32>,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Response containing embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<Embedding>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<EmbeddingUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_exact_match() {
        assert_eq!("xai".parse::<ProviderId>().unwrap(), ProviderId::Xai);
        assert_eq!("openrouter".parse::<ProviderId>().unwrap(), ProviderId::Openrouter);
        assert!("XAI".parse::<ProviderId>().is_err());
        assert!("openai".parse::<ProviderId>().is_err());
    }

    #[test]
    fn test_chat_request_keeps_extra_options() {
        let json = serde_json::json!({
            "provider": "xai",
            "model": "grok-4",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 64,
            "top_p": 0.9,
            "stop": ["\n"]
        });
        let request: ChatRequest = serde_json::from_value(json).unwrap();

        assert_eq!(request.max_tokens, Some(64));
        assert!(!request.stream);
        assert_eq!(request.options["top_p"], 0.9);
        assert_eq!(request.options["stop"], serde_json::json!(["\n"]));
        assert!(!request.options.contains_key("provider"));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let json = serde_json::json!({
            "provider": "xai",
            "model": "grok-4",
            "messages": [{"role": "tool", "content": "hi"}]
        });
        assert!(serde_json::from_value::<ChatRequest>(json).is_err());
    }

    #[test]
    fn test_validate_empty_messages() {
        let request = ChatRequest::new("xai", "grok-4", vec![]);
        let err = request.validate().unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
    }

    #[test]
    fn test_validate_ranges() {
        let ok = ChatRequest::new("xai", "grok-4", vec![Message::user("hi")]).with_temperature(1.0);
        assert!(ok.validate().is_ok());

        let hot = ok.clone().with_temperature(2.5);
        assert!(hot.validate().is_err());

        let zero = ok.with_max_tokens(0);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_usage_total() {
        assert_eq!(Usage::new(12, 30).total_tokens, 42);
    }

    #[test]
    fn test_usage_total_saturates_on_huge_counts() {
        assert_eq!(Usage::new(u32::MAX, 1).total_tokens, u32::MAX);
        assert_eq!(Usage::new(u32::MAX - 1, 1).total_tokens, u32::MAX);
    }

    #[test]
    fn test_unknown_provider_id_error() {
        let err = "gpt".parse::<ProviderId>().unwrap_err();
        assert_eq!(err, UnknownProviderId("gpt".to_string()));
        assert_eq!(err.to_string(), "unknown provider 'gpt'");
    }

    #[test]
    fn test_embedding_input_shapes() {
        let single: EmbeddingInput = serde_json::from_value(serde_json::json!("one")).unwrap();
        let batch: EmbeddingInput = serde_json::from_value(serde_json::json!(["a", "b"])).unwrap();
        assert_eq!(single.as_vec(), vec!["one"]);
        assert_eq!(batch.as_vec(), vec!["a", "b"]);
    }

    #[test]
    fn test_unsupported_maps_to_not_implemented() {
        let err = ProviderError::Unsupported {
            provider: ProviderId::Anthropic,
            operation: "embeddings",
        };
        assert_eq!(GatewayError::from(err).status().as_u16(), 501);
    }
}
