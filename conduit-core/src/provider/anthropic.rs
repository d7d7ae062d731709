//! Anthropic Messages API provider.

use super::types::*;
use super::utils::ensure_success;
use crate::config::ProviderSettings;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    base_url: String,
    api_key: Option<String>,
    default_max_tokens: u32,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(settings: &ProviderSettings, http_client: reqwest::Client) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.resolve_api_key(),
            default_max_tokens: settings.default_max_tokens,
            timeout: Duration::from_secs(settings.timeout_secs),
            http_client,
        }
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .http_client
            .post(format!("{}/messages", self.base_url))
            .header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }

    /// System messages move to the top-level `system` field; the rest keep their order.
    fn messages_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<&Message> = request
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();

        let mut body: Map<String, Value> = request.options.clone();
        if !system.is_empty() {
            body.insert("system".into(), Value::String(system.join("\n\n")));
        }
        body.insert("model".into(), Value::String(request.model.clone()));
        body.insert("messages".into(), serde_json::json!(messages));
        body.insert(
            "max_tokens".into(),
            serde_json::json!(request.max_tokens.unwrap_or(self.default_max_tokens)),
        );
        body.insert("stream".into(), Value::Bool(stream));
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), serde_json::json!(temperature));
        }
        Value::Object(body)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let provider = self.id();
        let response = self
            .post()
            .timeout(self.timeout)
            .json(&self.messages_body(request, false))
            .send()
            .await
            .map_err(|e| ProviderError::transport(provider, e))?;
        let response = ensure_success(provider, response).await?;

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::decode(provider, e.to_string()))?;

        let content = payload
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(ChatCompletion {
            id: payload.id,
            provider,
            model: payload.model.unwrap_or_else(|| request.model.clone()),
            created: chrono::Utc::now().timestamp(),
            content,
            finish_reason: payload.stop_reason,
            usage: payload
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens)),
            native: None,
        })
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let provider = self.id();
        let response = self
            .post()
            .json(&self.messages_body(request, true))
            .send()
            .await
            .map_err(|e| ProviderError::transport(provider, e))?;
        let response = ensure_success(provider, response).await?;

        let events = response.bytes_stream().eventsource();

        let stream = async_stream::stream! {
            let mut events = Box::pin(events);
            let mut finished = false;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(ProviderError::stream(provider, e.to_string()));
                        return;
                    }
                };
                if event.data.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<StreamEvent>(&event.data) {
                    Ok(StreamEvent::ContentBlockDelta { delta }) => {
                        if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                            yield Ok(StreamChunk::text(text));
                        }
                    }
                    Ok(StreamEvent::MessageDelta { delta }) => {
                        if delta.stop_reason.is_some() {
                            yield Ok(StreamChunk {
                                content: String::new(),
                                finish_reason: delta.stop_reason,
                            });
                        }
                    }
                    Ok(StreamEvent::MessageStop) => {
                        finished = true;
                        break;
                    }
                    Ok(StreamEvent::Error { error }) => {
                        yield Err(ProviderError::stream(provider, error.message));
                        return;
                    }
                    Ok(StreamEvent::Other) => {}
                    Err(e) => {
                        yield Err(ProviderError::stream(provider, format!("malformed event: {e}")));
                        return;
                    }
                }
            }

            if !finished {
                yield Err(ProviderError::stream(provider, "stream ended before completion"));
            }
        };

        Ok(Box::pin(stream))
    }
}

// Anthropic wire types (internal)

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    MessageDelta { delta: MessageDeltaBody },
    MessageStop,
    Error { error: StreamErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    message: String,
}
