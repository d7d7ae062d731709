//! OpenAI-compatible provider implementation.
//!
//! xAI, DeepSeek, OpenRouter and NVIDIA all expose the OpenAI
//! `chat/completions` and `embeddings` endpoints, so one adapter serves them.

use super::types::*;
use super::utils::ensure_success;
use crate::config::ProviderSettings;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Provider speaking the OpenAI wire format.
#[derive(Debug, Clone)]
pub struct OpenAiCompatProvider {
    id: ProviderId,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(id: ProviderId, settings: &ProviderSettings, http_client: reqwest::Client) -> Self {
        Self {
            id,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.resolve_api_key(),
            timeout: Duration::from_secs(settings.timeout_secs),
            http_client,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http_client.post(format!("{}/{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if self.id == ProviderId::Openrouter {
            builder = builder.header("X-Title", "conduit");
        }
        builder
    }

    /// Provider options first, then the canonical fields on top so they always win.
    fn chat_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body: Map<String, Value> = request.options.clone();
        body.insert("model".into(), Value::String(request.model.clone()));
        body.insert("messages".into(), serde_json::json!(request.messages));
        body.insert("stream".into(), Value::Bool(stream));
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), serde_json::json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".into(), serde_json::json!(max_tokens));
        }
        Value::Object(body)
    }

    fn embeddings_body(&self, request: &EmbeddingRequest) -> Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "input": request.input,
            "encoding_format": "float",
        });
        // NVIDIA retrieval models are asymmetric and need to know the side.
        if self.id == ProviderId::Nvidia {
            body["input_type"] = Value::String("query".into());
        }
        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let response = self
            .post("chat/completions")
            .timeout(self.timeout)
            .json(&self.chat_body(request, false))
            .send()
            .await
            .map_err(|e| ProviderError::transport(self.id, e))?;
        let response = ensure_success(self.id, response).await?;

        let native: Map<String, Value> = response
            .json()
            .await
            .map_err(|e| ProviderError::decode(self.id, e.to_string()))?;
        let payload: OpenAiChatResponse = serde_json::from_value(Value::Object(native.clone()))
            .map_err(|e| ProviderError::decode(self.id, e.to_string()))?;

        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::decode(self.id, "response contained no choices"))?;

        Ok(ChatCompletion {
            id: payload.id.unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4())),
            provider: self.id,
            model: payload.model.unwrap_or_else(|| request.model.clone()),
            created: payload.created.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: payload.usage.map(OpenAiUsage::into_usage),
            native: Some(native),
        })
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let response = self
            .post("chat/completions")
            .json(&self.chat_body(request, true))
            .send()
            .await
            .map_err(|e| ProviderError::transport(self.id, e))?;
        let response = ensure_success(self.id, response).await?;

        let provider = self.id;
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

                let data = event.data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == DONE_MARKER {
                    finished = true;
                    break;
                }

                let chunk = match serde_json::from_str::<OpenAiStreamChunk>(data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::stream(provider, format!("malformed chunk: {e}")));
                        return;
                    }
                };

                // OpenRouter reports mid-stream failures inside a data frame.
                if let Some(error) = chunk.error {
                    yield Err(ProviderError::stream(provider, error.message));
                    return;
                }

                for choice in chunk.choices {
                    let content = choice.delta.and_then(|d| d.content).unwrap_or_default();
                    if content.is_empty() && choice.finish_reason.is_none() {
                        continue;
                    }
                    yield Ok(StreamChunk {
                        content,
                        finish_reason: choice.finish_reason,
                    });
                }
            }

            if !finished {
                yield Err(ProviderError::stream(provider, "stream ended before completion"));
            }
        };

        Ok(Box::pin(stream))
    }

    fn supports_embeddings(&self) -> bool {
        matches!(self.id, ProviderId::Nvidia | ProviderId::Openrouter)
    }

    async fn embeddings(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        if !self.supports_embeddings() {
            return Err(ProviderError::Unsupported {
                provider: self.id,
                operation: "embeddings",
            });
        }

        let response = self
            .post("embeddings")
            .timeout(self.timeout)
            .json(&self.embeddings_body(request))
            .send()
            .await
            .map_err(|e| ProviderError::transport(self.id, e))?;
        let response = ensure_success(self.id, response).await?;

        let mut payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::decode(self.id, e.to_string()))?;
        payload.data.sort_by_key(|item| item.index);

        Ok(payload)
    }
}

// OpenAI wire types (internal)

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl OpenAiUsage {
    fn into_usage(self) -> Usage {
        let mut usage = Usage::new(self.prompt_tokens, self.completion_tokens);
        if let Some(total) = self.total_tokens {
            usage.total_tokens = total;
        }
        usage
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    error: Option<OpenAiStreamError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: Option<OpenAiDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamError {
    #[serde(default = "default_stream_error")]
    message: String,
}

fn default_stream_error() -> String {
    "upstream reported an error".to_string()
}
